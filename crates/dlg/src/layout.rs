//! List indices layout planning.
//!
//! Every List field must carry its final byte offset into the list indices
//! section when the field is created. [`ListLayout::plan`] walks the dialog
//! once, before any struct exists, and assigns each logical list its offset.
//! The writer then fills the section in the same order and checks the result
//! against the plan.
//!
//! Section order:
//!
//! ```text
//! EntryList, ReplyList, StartingList
//! RepliesList of each entry
//! EntriesList of each reply
//! ConditionParams of each entry pointer, each reply pointer, each start
//! ActionParams of each entry, each reply
//! ```
//!
//! A list takes `4 + 4 * len` bytes; empty lists still write their count.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::types::{Dialog, Pointer};

/// Logical identity of one list occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListId {
    EntryList,
    ReplyList,
    StartingList,
    /// Pointer list of entry `n`.
    RepliesList(usize),
    /// Pointer list of reply `n`.
    EntriesList(usize),
    /// ConditionParams of pointer `p` on entry `n`.
    EntryConditions(usize, usize),
    /// ConditionParams of pointer `p` on reply `n`.
    ReplyConditions(usize, usize),
    /// ConditionParams of start `n`.
    StartConditions(usize),
    EntryActions(usize),
    ReplyActions(usize),
}

/// Byte size of a list with `len` elements.
pub fn list_size(len: usize) -> u32 {
    4 + 4 * len as u32
}

/// Planned offsets of every list in the list indices section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListLayout {
    pub entry_list: u32,
    pub reply_list: u32,
    pub starting_list: u32,
    /// Indexed by entry.
    pub replies_lists: Vec<u32>,
    /// Indexed by reply.
    pub entries_lists: Vec<u32>,
    /// Indexed by entry, then pointer.
    pub entry_conditions: Vec<Vec<u32>>,
    /// Indexed by reply, then pointer.
    pub reply_conditions: Vec<Vec<u32>>,
    /// Indexed by start.
    pub start_conditions: Vec<u32>,
    pub entry_actions: Vec<u32>,
    pub reply_actions: Vec<u32>,
    /// Every list in section order with its planned element count.
    order: Vec<(ListId, u32, usize)>,
    total_size: u32,
}

impl ListLayout {
    /// Plan the list indices section for `dialog` with the given (already
    /// normalized) starting list.
    pub fn plan(dialog: &Dialog, starts: &[Pointer]) -> Self {
        let mut layout = ListLayout::default();

        layout.entry_list = layout.push(ListId::EntryList, dialog.entries.len());
        layout.reply_list = layout.push(ListId::ReplyList, dialog.replies.len());
        layout.starting_list = layout.push(ListId::StartingList, starts.len());

        for (i, entry) in dialog.entries.iter().enumerate() {
            let offset = layout.push(ListId::RepliesList(i), entry.pointers.len());
            layout.replies_lists.push(offset);
        }
        for (i, reply) in dialog.replies.iter().enumerate() {
            let offset = layout.push(ListId::EntriesList(i), reply.pointers.len());
            layout.entries_lists.push(offset);
        }

        for (i, entry) in dialog.entries.iter().enumerate() {
            let offsets = entry
                .pointers
                .iter()
                .enumerate()
                .map(|(p, ptr)| layout.push(ListId::EntryConditions(i, p), ptr.condition_params.len()))
                .collect();
            layout.entry_conditions.push(offsets);
        }
        for (i, reply) in dialog.replies.iter().enumerate() {
            let offsets = reply
                .pointers
                .iter()
                .enumerate()
                .map(|(p, ptr)| layout.push(ListId::ReplyConditions(i, p), ptr.condition_params.len()))
                .collect();
            layout.reply_conditions.push(offsets);
        }
        for (i, start) in starts.iter().enumerate() {
            let offset = layout.push(ListId::StartConditions(i), start.condition_params.len());
            layout.start_conditions.push(offset);
        }

        for (i, entry) in dialog.entries.iter().enumerate() {
            let offset = layout.push(ListId::EntryActions(i), entry.action_params.len());
            layout.entry_actions.push(offset);
        }
        for (i, reply) in dialog.replies.iter().enumerate() {
            let offset = layout.push(ListId::ReplyActions(i), reply.action_params.len());
            layout.reply_actions.push(offset);
        }

        layout
    }

    fn push(&mut self, id: ListId, len: usize) -> u32 {
        let offset = self.total_size;
        self.order.push((id, offset, len));
        self.total_size += list_size(len);
        offset
    }

    /// Planned offset of a list. Panics if the list was not planned.
    pub fn offset(&self, id: ListId) -> u32 {
        match id {
            ListId::EntryList => self.entry_list,
            ListId::ReplyList => self.reply_list,
            ListId::StartingList => self.starting_list,
            ListId::RepliesList(n) => self.replies_lists[n],
            ListId::EntriesList(n) => self.entries_lists[n],
            ListId::EntryConditions(n, p) => self.entry_conditions[n][p],
            ListId::ReplyConditions(n, p) => self.reply_conditions[n][p],
            ListId::StartConditions(n) => self.start_conditions[n],
            ListId::EntryActions(n) => self.entry_actions[n],
            ListId::ReplyActions(n) => self.reply_actions[n],
        }
    }

    /// Planned size of the whole section in bytes.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Number of planned lists.
    pub fn list_count(&self) -> usize {
        self.order.len()
    }

    /// Lists in section order as (id, offset, element count).
    pub fn lists(&self) -> &[(ListId, u32, usize)] {
        &self.order
    }

    /// Write the section, taking each list's struct indices from `contents`.
    ///
    /// Panics if a list's contents disagree with the plan; the field records
    /// already point at the planned offsets, so any drift would corrupt the file.
    pub fn write_section<'m, F>(&self, contents: F) -> Vec<u8>
    where
        F: Fn(ListId) -> &'m [u32],
    {
        let mut data = Vec::with_capacity(self.total_size as usize);
        for &(id, offset, len) in &self.order {
            assert_eq!(
                data.len() as u32,
                offset,
                "list {:?} starts at {} but was planned at {}",
                id,
                data.len(),
                offset
            );
            let indices = contents(id);
            assert_eq!(
                indices.len(),
                len,
                "list {:?} has {} elements but {} were planned",
                id,
                indices.len(),
                len
            );
            // Writing into a Vec cannot fail.
            let _ = data.write_u32::<LittleEndian>(indices.len() as u32);
            for &index in indices {
                let _ = data.write_u32::<LittleEndian>(index);
            }
        }
        assert_eq!(
            data.len() as u32,
            self.total_size,
            "list indices section size drifted from the plan"
        );
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DialogNode, Param};

    fn sample() -> (Dialog, Vec<Pointer>) {
        let mut dlg = Dialog::new();
        let mut e0 = DialogNode::entry("Hello");
        let mut p = Pointer::new(0);
        p.add_condition_param(Param::new("a", "1"));
        e0.add_pointer(p);
        e0.add_pointer(Pointer::new(1));
        e0.add_action_param(Param::new("x", "y"));
        dlg.add_entry(e0);
        dlg.add_reply(DialogNode::reply("A"));
        let mut r1 = DialogNode::reply("B");
        r1.add_pointer(Pointer::link(0, "loop"));
        dlg.add_reply(r1);
        let starts = vec![Pointer::new(0)];
        dlg.starts = starts.clone();
        (dlg, starts)
    }

    #[test]
    fn test_empty_dialog_has_three_lists() {
        let layout = ListLayout::plan(&Dialog::new(), &[]);
        assert_eq!(layout.entry_list, 0);
        assert_eq!(layout.reply_list, 4);
        assert_eq!(layout.starting_list, 8);
        assert_eq!(layout.total_size(), 12);
        assert_eq!(layout.list_count(), 3);
    }

    #[test]
    fn test_plan_order_and_offsets() {
        let (dlg, starts) = sample();
        let layout = ListLayout::plan(&dlg, &starts);

        assert_eq!(layout.entry_list, 0); // 1 entry -> 8 bytes
        assert_eq!(layout.reply_list, 8); // 2 replies -> 12 bytes
        assert_eq!(layout.starting_list, 20); // 1 start -> 8 bytes
        assert_eq!(layout.replies_lists, vec![28]); // 2 pointers -> 12 bytes
        assert_eq!(layout.entries_lists, vec![40, 44]); // 0 -> 4, 1 -> 8
        assert_eq!(layout.entry_conditions, vec![vec![52, 60]]); // 1 -> 8, 0 -> 4
        assert_eq!(layout.reply_conditions, vec![vec![], vec![64]]);
        assert_eq!(layout.start_conditions, vec![68]);
        assert_eq!(layout.entry_actions, vec![72]); // 1 -> 8
        assert_eq!(layout.reply_actions, vec![80, 84]);
        assert_eq!(layout.total_size(), 88);

        assert_eq!(layout.offset(ListId::EntryConditions(0, 1)), 60);
        assert_eq!(layout.offset(ListId::ReplyActions(1)), 84);
    }

    #[test]
    fn test_offsets_are_cumulative() {
        let (dlg, starts) = sample();
        let layout = ListLayout::plan(&dlg, &starts);
        let mut expected = 0;
        for &(id, offset, len) in layout.lists() {
            assert_eq!(offset, expected, "{:?}", id);
            assert_eq!(layout.offset(id), offset);
            expected += list_size(len);
        }
        assert_eq!(expected, layout.total_size());
    }

    #[test]
    fn test_write_section_matches_plan() {
        let (dlg, starts) = sample();
        let layout = ListLayout::plan(&dlg, &starts);
        let contents: Vec<(ListId, Vec<u32>)> = layout
            .lists()
            .iter()
            .map(|&(id, _, len)| (id, (0..len as u32).collect()))
            .collect();
        let data = layout.write_section(|id| {
            contents
                .iter()
                .find(|(cid, _)| *cid == id)
                .map(|(_, v)| v.as_slice())
                .unwrap()
        });
        assert_eq!(data.len() as u32, layout.total_size());
        // ReplyList: count 2, then 0, 1
        assert_eq!(&data[8..20], &[2, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "were planned")]
    fn test_write_section_detects_drift() {
        let (dlg, starts) = sample();
        let layout = ListLayout::plan(&dlg, &starts);
        let empty: Vec<u32> = Vec::new();
        layout.write_section(|_| empty.as_slice());
    }
}
