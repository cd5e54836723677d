//! DLG conversation reader and writer.

use log::{debug, warn};
use std::io::{Read, Write};

use crate::alloc::StructAllocator;
use crate::error::{Error, Result};
use crate::gff::{GffFile, StructFields};
use crate::layout::ListLayout;
use crate::types::{Dialog, DialogNode, NodeKind, Param, Pointer};
use crate::validate::normalize_starts;

/// Field labels used by conversation files.
pub mod label {
    // Root struct
    pub const DELAY_ENTRY: &str = "DelayEntry";
    pub const DELAY_REPLY: &str = "DelayReply";
    pub const NUM_WORDS: &str = "NumWords";
    pub const END_CONVER_ABORT: &str = "EndConverAbort";
    pub const END_CONVERSATION: &str = "EndConversation";
    pub const PREVENT_ZOOM_IN: &str = "PreventZoomIn";
    pub const ENTRY_LIST: &str = "EntryList";
    pub const REPLY_LIST: &str = "ReplyList";
    pub const STARTING_LIST: &str = "StartingList";

    // Entry / reply structs
    pub const SPEAKER: &str = "Speaker";
    pub const ANIM_LOOP: &str = "AnimLoop";
    pub const ANIMATION: &str = "Animation";
    pub const TEXT: &str = "Text";
    pub const SCRIPT: &str = "Script";
    pub const ACTION_PARAMS: &str = "ActionParams";
    pub const DELAY: &str = "Delay";
    pub const COMMENT: &str = "Comment";
    pub const SOUND: &str = "Sound";
    pub const QUEST: &str = "Quest";
    pub const QUEST_ENTRY: &str = "QuestEntry";
    pub const REPLIES_LIST: &str = "RepliesList";
    pub const ENTRIES_LIST: &str = "EntriesList";

    // Pointer / start structs
    pub const INDEX: &str = "Index";
    pub const ACTIVE: &str = "Active";
    pub const CONDITION_PARAMS: &str = "ConditionParams";
    pub const IS_CHILD: &str = "IsChild";
    pub const LINK_COMMENT: &str = "LinkComment";

    // Param structs
    pub const KEY: &str = "Key";
    pub const VALUE: &str = "Value";
}

/// DLG file reader.
pub struct DlgReader;

impl DlgReader {
    /// Read a DLG file from a reader.
    pub fn read<R: Read>(mut reader: R) -> Result<Dialog> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Decode a DLG file held in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Dialog> {
        let gff = GffFile::parse(data)?;
        let root = gff.read_struct(0)?;

        let entries = Self::read_nodes(&gff, root.list(label::ENTRY_LIST), NodeKind::Entry)?;
        let replies = Self::read_nodes(&gff, root.list(label::REPLY_LIST), NodeKind::Reply)?;

        let mut starts = Vec::new();
        for &index in root.list(label::STARTING_LIST) {
            if let Some(fields) = Self::read_struct_or_skip(&gff, index)? {
                starts.push(Self::read_pointer(&gff, &fields)?);
            }
        }

        debug!(
            "Read dialog: {} entries, {} replies, {} starts",
            entries.len(),
            replies.len(),
            starts.len()
        );

        Ok(Dialog {
            delay_entry: root.u32_or(label::DELAY_ENTRY, 0),
            delay_reply: root.u32_or(label::DELAY_REPLY, 0),
            num_words: root.u32_or(label::NUM_WORDS, 0),
            script_end: root.string(label::END_CONVERSATION),
            script_abort: root.string(label::END_CONVER_ABORT),
            prevent_zoom_in: root.bool_or(label::PREVENT_ZOOM_IN, false),
            entries,
            replies,
            starts,
        })
    }

    /// Read a struct, logging and returning `None` if its index is out of range.
    fn read_struct_or_skip(gff: &GffFile, index: u32) -> Result<Option<StructFields>> {
        match gff.read_struct(index) {
            Ok(fields) => Ok(Some(fields)),
            Err(e @ Error::InvalidIndex { .. }) => {
                warn!("Skipping list element: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Read an EntryList or ReplyList.
    ///
    /// A bad element becomes an empty placeholder node so pointers into the
    /// array keep their local indices.
    fn read_nodes(gff: &GffFile, list: &[u32], kind: NodeKind) -> Result<Vec<DialogNode>> {
        let mut nodes = Vec::with_capacity(list.len());
        for (position, &index) in list.iter().enumerate() {
            match gff.read_struct(index) {
                Ok(fields) => nodes.push(Self::read_node(gff, &fields, kind)?),
                Err(e @ Error::InvalidIndex { .. }) => {
                    warn!("{} {}: using placeholder node: {}", kind.name(), position, e);
                    nodes.push(DialogNode {
                        kind,
                        ..DialogNode::default()
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(nodes)
    }

    fn read_node(gff: &GffFile, fields: &StructFields, kind: NodeKind) -> Result<DialogNode> {
        let pointer_label = match kind {
            NodeKind::Entry => label::REPLIES_LIST,
            NodeKind::Reply => label::ENTRIES_LIST,
        };

        let mut pointers = Vec::new();
        for &index in fields.list(pointer_label) {
            if let Some(pointer) = Self::read_struct_or_skip(gff, index)? {
                pointers.push(Self::read_pointer(gff, &pointer)?);
            }
        }

        Ok(DialogNode {
            kind,
            text: fields.loc_string(label::TEXT),
            speaker: fields.string(label::SPEAKER),
            animation: fields.u32_or(label::ANIMATION, 0),
            animation_loop: fields.bool_or(label::ANIM_LOOP, false),
            script_action: fields.string(label::SCRIPT),
            delay: fields.u32_or(label::DELAY, 0),
            comment: fields.string(label::COMMENT),
            sound: fields.string(label::SOUND),
            quest: fields.string(label::QUEST),
            quest_entry: fields.u32_or(label::QUEST_ENTRY, 0),
            action_params: Self::read_params(gff, fields.list(label::ACTION_PARAMS))?,
            pointers,
        })
    }

    /// Read a node pointer or start struct.
    fn read_pointer(gff: &GffFile, fields: &StructFields) -> Result<Pointer> {
        Ok(Pointer {
            index: fields.u32_or(label::INDEX, 0),
            is_link: fields.bool_or(label::IS_CHILD, false),
            script_appears: fields.string(label::ACTIVE),
            link_comment: fields.string(label::LINK_COMMENT),
            condition_params: Self::read_params(gff, fields.list(label::CONDITION_PARAMS))?,
        })
    }

    fn read_params(gff: &GffFile, list: &[u32]) -> Result<Vec<Param>> {
        let mut params = Vec::with_capacity(list.len());
        for &index in list {
            if let Some(fields) = Self::read_struct_or_skip(gff, index)? {
                params.push(Param {
                    key: fields.string(label::KEY),
                    value: fields.string(label::VALUE),
                });
            }
        }
        Ok(params)
    }
}

/// DLG file writer.
pub struct DlgWriter;

impl DlgWriter {
    /// Write a dialog to a writer.
    ///
    /// The file is assembled in memory first; nothing is written on error.
    pub fn write<W: Write>(dialog: &Dialog, mut writer: W) -> Result<()> {
        let data = Self::to_bytes(dialog)?;
        writer.write_all(&data)?;
        Ok(())
    }

    /// Encode a dialog into a complete DLG file.
    pub fn to_bytes(dialog: &Dialog) -> Result<Vec<u8>> {
        let starts = normalize_starts(dialog);
        if starts.len() != dialog.starts.len() {
            debug!(
                "Normalized starting list from {} to {} pointers",
                dialog.starts.len(),
                starts.len()
            );
        }

        let layout = ListLayout::plan(dialog, &starts);
        let (builder, map) = StructAllocator::new(dialog, &starts, &layout).run();
        let list_indices = layout.write_section(|id| map.list(id));
        builder.finish(&list_indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};

    fn two_entry_dialog() -> Dialog {
        let mut dlg = Dialog::new();
        let mut e0 = DialogNode::entry("First");
        e0.add_pointer(Pointer::new(0));
        dlg.add_entry(e0);
        dlg.add_entry(DialogNode::entry("Second"));
        let mut r0 = DialogNode::reply("Go on");
        r0.add_pointer(Pointer::new(1));
        dlg.add_reply(r0);
        dlg.add_start(Pointer::new(0));
        dlg
    }

    #[test]
    fn test_stream_roundtrip() {
        let dlg = two_entry_dialog();
        let mut buffer = Vec::new();
        DlgWriter::write(&dlg, &mut buffer).unwrap();
        let read = DlgReader::read(buffer.as_slice()).unwrap();
        assert_eq!(read, dlg);
    }

    #[test]
    fn test_out_of_range_entry_struct_becomes_placeholder() {
        let dlg = two_entry_dialog();
        let mut data = DlgWriter::to_bytes(&dlg).unwrap();
        let gff = GffFile::parse(&data).unwrap();
        let list_base = gff.header().list_indices_offset as usize;
        // EntryList is the first list: count, then entry 0's struct index.
        LittleEndian::write_u32(&mut data[list_base + 4..list_base + 8], 9999);

        let read = DlgReader::from_bytes(&data).unwrap();
        assert_eq!(read.entries.len(), 2);
        assert_eq!(read.entries[0], DialogNode::default());
        assert_eq!(read.entries[1].text.text(), "Second");
        assert_eq!(read.replies[0].pointers[0].index, 1);
    }

    #[test]
    fn test_out_of_range_start_struct_is_skipped() {
        let dlg = two_entry_dialog();
        let mut data = DlgWriter::to_bytes(&dlg).unwrap();
        let gff = GffFile::parse(&data).unwrap();
        let offset = gff.header().list_indices_offset as usize;
        // StartingList follows EntryList (2 entries) and ReplyList (1 reply).
        let starting = offset + 12 + 8;
        assert_eq!(LittleEndian::read_u32(&data[starting..starting + 4]), 1);
        LittleEndian::write_u32(&mut data[starting + 4..starting + 8], 777);

        let read = DlgReader::from_bytes(&data).unwrap();
        assert!(read.starts.is_empty());
        assert_eq!(read.entries.len(), 2);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        // A hand-built root with an extra field and missing optional ones.
        let mut builder = crate::gff::GffBuilder::new();
        builder.begin_struct(crate::gff::ROOT_STRUCT_TYPE, 3);
        builder.add_dword("NumWords", 12);
        builder.add_dword("Unknown", 5);
        builder.add_resref(label::END_CONVERSATION, "nw_end");
        let data = builder.finish(&[]).unwrap();

        let read = DlgReader::from_bytes(&data).unwrap();
        assert_eq!(read.num_words, 12);
        assert_eq!(read.script_end, "nw_end");
        assert_eq!(read.script_abort, "");
        assert!(read.entries.is_empty());
        assert!(read.starts.is_empty());
    }
}
