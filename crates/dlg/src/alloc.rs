//! Struct and field allocation for the write pass.
//!
//! Structs are allocated in entry-first batches, not by walking the
//! conversation depth-first:
//!
//! 1. the root struct (fields 0..=8),
//! 2. each entry followed immediately by its pointer structs,
//! 3. each reply followed immediately by its pointer structs,
//! 4. one wrapper struct per start,
//! 5. the key/value param structs, in the same order their lists are laid
//!    out (all condition lists, then all action lists).
//!
//! A struct's fields are written as soon as the struct is allocated, so the
//! field table is contiguous per struct and the field indices section is the
//! identity sequence. List fields take their offsets from the
//! [`ListLayout`] computed up front.

use log::debug;

use crate::dlg::label;
use crate::gff::{GffBuilder, ROOT_STRUCT_TYPE};
use crate::layout::{ListId, ListLayout};
use crate::types::{Dialog, DialogNode, NodeKind, Param, Pointer};

/// Fields of the root struct.
pub const ROOT_FIELD_COUNT: u32 = 9;
/// Fields of an entry without a quest.
pub const ENTRY_FIELD_COUNT: u32 = 11;
/// Fields of a reply without a quest.
pub const REPLY_FIELD_COUNT: u32 = 10;
/// Fields of a pointer that is not a link.
pub const POINTER_FIELD_COUNT: u32 = 4;
pub const START_FIELD_COUNT: u32 = 3;
pub const PARAM_FIELD_COUNT: u32 = 2;

/// Number of fields written for a node.
pub fn node_field_count(node: &DialogNode, kind: NodeKind) -> u32 {
    let base = match kind {
        NodeKind::Entry => ENTRY_FIELD_COUNT,
        NodeKind::Reply => REPLY_FIELD_COUNT,
    };
    base + node.has_quest() as u32
}

/// Number of fields written for a node pointer.
pub fn pointer_field_count(pointer: &Pointer) -> u32 {
    POINTER_FIELD_COUNT + pointer.is_link as u32
}

/// Allocation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    AllocatingEntries,
    AllocatingReplies,
    AllocatingStarts,
    AllocatingParams,
    Done,
}

/// Struct table indices of every logical object, recorded at allocation.
///
/// This is what the list indices section is filled from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructMap {
    pub root: u32,
    /// Indexed by entry.
    pub entries: Vec<u32>,
    /// Indexed by reply.
    pub replies: Vec<u32>,
    /// Indexed by start.
    pub starts: Vec<u32>,
    /// Indexed by entry, then pointer.
    pub entry_pointers: Vec<Vec<u32>>,
    /// Indexed by reply, then pointer.
    pub reply_pointers: Vec<Vec<u32>>,
    /// Indexed by entry, pointer, then param.
    pub entry_conditions: Vec<Vec<Vec<u32>>>,
    pub reply_conditions: Vec<Vec<Vec<u32>>>,
    /// Indexed by start, then param.
    pub start_conditions: Vec<Vec<u32>>,
    /// Indexed by entry, then param.
    pub entry_actions: Vec<Vec<u32>>,
    pub reply_actions: Vec<Vec<u32>>,
}

impl StructMap {
    /// Element struct indices of a list.
    pub fn list(&self, id: ListId) -> &[u32] {
        match id {
            ListId::EntryList => &self.entries,
            ListId::ReplyList => &self.replies,
            ListId::StartingList => &self.starts,
            ListId::RepliesList(n) => &self.entry_pointers[n],
            ListId::EntriesList(n) => &self.reply_pointers[n],
            ListId::EntryConditions(n, p) => &self.entry_conditions[n][p],
            ListId::ReplyConditions(n, p) => &self.reply_conditions[n][p],
            ListId::StartConditions(n) => &self.start_conditions[n],
            ListId::EntryActions(n) => &self.entry_actions[n],
            ListId::ReplyActions(n) => &self.reply_actions[n],
        }
    }
}

/// Single-use allocator for one encode call.
pub struct StructAllocator<'d> {
    dialog: &'d Dialog,
    starts: &'d [Pointer],
    layout: &'d ListLayout,
    builder: GffBuilder,
    map: StructMap,
    phase: Phase,
}

impl<'d> StructAllocator<'d> {
    /// Create an allocator. `starts` is the normalized starting list that
    /// `layout` was planned with.
    pub fn new(dialog: &'d Dialog, starts: &'d [Pointer], layout: &'d ListLayout) -> Self {
        Self {
            dialog,
            starts,
            layout,
            builder: GffBuilder::new(),
            map: StructMap::default(),
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run every phase and return the filled tables and the struct map.
    pub fn run(mut self) -> (GffBuilder, StructMap) {
        self.alloc_root();

        self.enter(Phase::AllocatingEntries);
        for i in 0..self.dialog.entries.len() {
            self.alloc_node(NodeKind::Entry, i);
        }

        self.enter(Phase::AllocatingReplies);
        for i in 0..self.dialog.replies.len() {
            self.alloc_node(NodeKind::Reply, i);
        }

        self.enter(Phase::AllocatingStarts);
        for i in 0..self.starts.len() {
            self.alloc_start(i);
        }

        self.enter(Phase::AllocatingParams);
        self.alloc_all_params();

        self.enter(Phase::Done);
        debug!(
            "Allocated {} structs and {} fields",
            self.builder.struct_count(),
            self.builder.field_count()
        );
        (self.builder, self.map)
    }

    fn enter(&mut self, next: Phase) {
        assert!(
            next > self.phase,
            "allocation phase moved from {:?} back to {:?}",
            self.phase,
            next
        );
        debug!(
            "{:?} -> {:?} at struct {}",
            self.phase,
            next,
            self.builder.struct_count()
        );
        self.phase = next;
    }

    fn alloc_root(&mut self) {
        assert_eq!(self.phase, Phase::Idle);
        let dialog = self.dialog;
        let b = &mut self.builder;

        self.map.root = b.begin_struct(ROOT_STRUCT_TYPE, ROOT_FIELD_COUNT);
        b.add_dword(label::DELAY_ENTRY, dialog.delay_entry);
        b.add_dword(label::DELAY_REPLY, dialog.delay_reply);
        b.add_dword(label::NUM_WORDS, dialog.num_words);
        b.add_resref(label::END_CONVER_ABORT, &dialog.script_abort);
        b.add_resref(label::END_CONVERSATION, &dialog.script_end);
        b.add_byte(label::PREVENT_ZOOM_IN, dialog.prevent_zoom_in as u8);
        b.add_list(label::ENTRY_LIST, self.layout.offset(ListId::EntryList));
        b.add_list(label::REPLY_LIST, self.layout.offset(ListId::ReplyList));
        b.add_list(label::STARTING_LIST, self.layout.offset(ListId::StartingList));
    }

    /// Allocate a node's content struct, then its pointer structs.
    fn alloc_node(&mut self, kind: NodeKind, index: usize) {
        let dialog = self.dialog;
        let node = &dialog.nodes(kind)[index];
        let (actions, pointers) = match kind {
            NodeKind::Entry => (ListId::EntryActions(index), ListId::RepliesList(index)),
            NodeKind::Reply => (ListId::ReplyActions(index), ListId::EntriesList(index)),
        };
        let pointer_label = match kind {
            NodeKind::Entry => label::REPLIES_LIST,
            NodeKind::Reply => label::ENTRIES_LIST,
        };

        let b = &mut self.builder;
        let struct_index = b.begin_struct(index as u32, node_field_count(node, kind));
        if kind == NodeKind::Entry {
            b.add_exo_string(label::SPEAKER, &node.speaker);
        }
        b.add_byte(label::ANIM_LOOP, node.animation_loop as u8);
        b.add_dword(label::ANIMATION, node.animation);
        b.add_loc_string(label::TEXT, &node.text);
        b.add_resref(label::SCRIPT, &node.script_action);
        b.add_list(label::ACTION_PARAMS, self.layout.offset(actions));
        b.add_dword(label::DELAY, node.delay);
        b.add_exo_string(label::COMMENT, &node.comment);
        b.add_resref(label::SOUND, &node.sound);
        b.add_exo_string(label::QUEST, &node.quest);
        if node.has_quest() {
            b.add_dword(label::QUEST_ENTRY, node.quest_entry);
        }
        b.add_list(pointer_label, self.layout.offset(pointers));

        let pointer_structs = node
            .pointers
            .iter()
            .enumerate()
            .map(|(p, pointer)| self.alloc_pointer(kind, index, p, pointer))
            .collect();

        match kind {
            NodeKind::Entry => {
                self.map.entries.push(struct_index);
                self.map.entry_pointers.push(pointer_structs);
            }
            NodeKind::Reply => {
                self.map.replies.push(struct_index);
                self.map.reply_pointers.push(pointer_structs);
            }
        }
    }

    fn alloc_pointer(
        &mut self,
        owner: NodeKind,
        node: usize,
        position: usize,
        pointer: &Pointer,
    ) -> u32 {
        let conditions = match owner {
            NodeKind::Entry => ListId::EntryConditions(node, position),
            NodeKind::Reply => ListId::ReplyConditions(node, position),
        };

        let b = &mut self.builder;
        let struct_index = b.begin_struct(position as u32, pointer_field_count(pointer));
        b.add_dword(label::INDEX, pointer.index);
        b.add_resref(label::ACTIVE, &pointer.script_appears);
        b.add_list(label::CONDITION_PARAMS, self.layout.offset(conditions));
        b.add_byte(label::IS_CHILD, pointer.is_link as u8);
        if pointer.is_link {
            b.add_exo_string(label::LINK_COMMENT, &pointer.link_comment);
        }
        struct_index
    }

    fn alloc_start(&mut self, position: usize) {
        let starts = self.starts;
        let start = &starts[position];
        let b = &mut self.builder;
        let struct_index = b.begin_struct(position as u32, START_FIELD_COUNT);
        b.add_dword(label::INDEX, start.index);
        b.add_resref(label::ACTIVE, &start.script_appears);
        b.add_list(
            label::CONDITION_PARAMS,
            self.layout.offset(ListId::StartConditions(position)),
        );
        self.map.starts.push(struct_index);
    }

    /// Param structs, in list layout order.
    fn alloc_all_params(&mut self) {
        let dialog = self.dialog;
        let starts = self.starts;

        for entry in &dialog.entries {
            let lists = entry
                .pointers
                .iter()
                .map(|p| self.alloc_params(&p.condition_params))
                .collect();
            self.map.entry_conditions.push(lists);
        }
        for reply in &dialog.replies {
            let lists = reply
                .pointers
                .iter()
                .map(|p| self.alloc_params(&p.condition_params))
                .collect();
            self.map.reply_conditions.push(lists);
        }
        for start in starts {
            let list = self.alloc_params(&start.condition_params);
            self.map.start_conditions.push(list);
        }
        for entry in &dialog.entries {
            let list = self.alloc_params(&entry.action_params);
            self.map.entry_actions.push(list);
        }
        for reply in &dialog.replies {
            let list = self.alloc_params(&reply.action_params);
            self.map.reply_actions.push(list);
        }
    }

    fn alloc_params(&mut self, params: &[Param]) -> Vec<u32> {
        params
            .iter()
            .enumerate()
            .map(|(position, param)| {
                let b = &mut self.builder;
                let struct_index = b.begin_struct(position as u32, PARAM_FIELD_COUNT);
                b.add_exo_string(label::KEY, &param.key);
                b.add_exo_string(label::VALUE, &param.value);
                struct_index
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dialog {
        let mut dlg = Dialog::new();
        let mut e0 = DialogNode::entry("Hello");
        e0.add_pointer(Pointer::new(0).with_condition("gc_check"));
        e0.add_pointer(Pointer::link(1, "again"));
        e0.add_action_param(Param::new("sTag", "guard"));
        dlg.add_entry(e0);
        let mut e1 = DialogNode::entry("Quest time");
        e1.set_quest("fetch_item", 10);
        dlg.add_entry(e1);
        let mut r0 = DialogNode::reply("Hi");
        r0.add_pointer(Pointer::new(1));
        dlg.add_reply(r0);
        dlg.add_reply(DialogNode::reply("Bye"));
        let mut start = Pointer::new(0);
        start.add_condition_param(Param::new("k", "v"));
        dlg.add_start(start);
        dlg
    }

    #[test]
    fn test_entry_first_struct_order() {
        let dlg = sample();
        let layout = ListLayout::plan(&dlg, &dlg.starts);
        let (builder, map) = StructAllocator::new(&dlg, &dlg.starts, &layout).run();

        assert_eq!(map.root, 0);
        // entry 0, its two pointers, entry 1 (no pointers)
        assert_eq!(map.entries, vec![1, 4]);
        assert_eq!(map.entry_pointers, vec![vec![2, 3], vec![]]);
        // reply 0, its pointer, reply 1
        assert_eq!(map.replies, vec![5, 7]);
        assert_eq!(map.reply_pointers, vec![vec![6], vec![]]);
        assert_eq!(map.starts, vec![8]);
        // params: start condition, then entry 0 action
        assert_eq!(map.entry_conditions, vec![vec![vec![], vec![]], vec![]]);
        assert_eq!(map.start_conditions, vec![vec![9]]);
        assert_eq!(map.entry_actions, vec![vec![10], vec![]]);
        assert_eq!(builder.struct_count(), 11);
    }

    #[test]
    fn test_field_counts() {
        let dlg = sample();
        assert_eq!(node_field_count(&dlg.entries[0], NodeKind::Entry), 11);
        assert_eq!(node_field_count(&dlg.entries[1], NodeKind::Entry), 12);
        assert_eq!(node_field_count(&dlg.replies[0], NodeKind::Reply), 10);
        assert_eq!(pointer_field_count(&dlg.entries[0].pointers[0]), 4);
        assert_eq!(pointer_field_count(&dlg.entries[0].pointers[1]), 5);

        let layout = ListLayout::plan(&dlg, &dlg.starts);
        let (builder, _) = StructAllocator::new(&dlg, &dlg.starts, &layout).run();
        let expected = 9 + 11 + 4 + 5 + 12 + 10 + 4 + 10 + 3 + 2 + 2;
        assert_eq!(builder.field_count(), expected);
    }

    #[test]
    fn test_struct_map_fills_planned_lists() {
        let dlg = sample();
        let layout = ListLayout::plan(&dlg, &dlg.starts);
        let (_, map) = StructAllocator::new(&dlg, &dlg.starts, &layout).run();
        let section = layout.write_section(|id| map.list(id));
        assert_eq!(section.len() as u32, layout.total_size());
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::Idle < Phase::AllocatingEntries);
        assert!(Phase::AllocatingEntries < Phase::AllocatingReplies);
        assert!(Phase::AllocatingReplies < Phase::AllocatingStarts);
        assert!(Phase::AllocatingStarts < Phase::AllocatingParams);
        assert!(Phase::AllocatingParams < Phase::Done);
    }
}
