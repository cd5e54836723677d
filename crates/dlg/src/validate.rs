//! Dialog validation and starting list normalization.
//!
//! Validation never blocks encoding; it reports what the engine would
//! silently drop or misread.

use std::collections::HashSet;
use std::fmt;

use crate::field_data::RESREF_MAX_LEN;
use crate::types::{Dialog, DialogNode, NodeKind, Pointer, UNSET_INDEX};

/// A structural problem found in a dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The dialog has no entries and no replies.
    NoNodes,
    /// Entries exist but nothing starts the conversation.
    NoStarts,
    /// Start `start` holds the unset index.
    UnsetStart { start: usize },
    StartOutOfRange { start: usize, index: u32 },
    /// Start `start` repeats an index already started earlier.
    DuplicateStart { start: usize, index: u32 },
    /// Pointer `pointer` of node `node` targets a missing node.
    PointerOutOfRange {
        kind: NodeKind,
        node: usize,
        pointer: usize,
        index: u32,
    },
    /// A resource name is longer than 16 bytes and will be truncated.
    ResRefTooLong { location: String, value: String },
    /// A quest entry number without a quest tag is not written.
    QuestEntryWithoutQuest { kind: NodeKind, node: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NoNodes => write!(f, "dialog has no entries or replies"),
            Warning::NoStarts => write!(f, "dialog has entries but no starting list"),
            Warning::UnsetStart { start } => write!(f, "start {} has no target", start),
            Warning::StartOutOfRange { start, index } => {
                write!(f, "start {} targets missing entry {}", start, index)
            }
            Warning::DuplicateStart { start, index } => {
                write!(f, "start {} repeats entry {}", start, index)
            }
            Warning::PointerOutOfRange {
                kind,
                node,
                pointer,
                index,
            } => write!(
                f,
                "{} {} pointer {} targets missing {} {}",
                kind.name(),
                node,
                pointer,
                kind.opposite().name(),
                index
            ),
            Warning::ResRefTooLong { location, value } => write!(
                f,
                "{}: resref {:?} is longer than {} bytes",
                location, value, RESREF_MAX_LEN
            ),
            Warning::QuestEntryWithoutQuest { kind, node } => write!(
                f,
                "{} {} has a quest entry but no quest",
                kind.name(),
                node
            ),
        }
    }
}

/// Starting list as it will be written.
///
/// Unset, out-of-range and repeated start indices are dropped; the first
/// occurrence of each entry index wins and order is kept. The dialog itself
/// is not modified.
pub fn normalize_starts(dialog: &Dialog) -> Vec<Pointer> {
    let mut seen = HashSet::new();
    dialog
        .starts
        .iter()
        .filter(|start| {
            start.index != UNSET_INDEX
                && (start.index as usize) < dialog.entries.len()
                && seen.insert(start.index)
        })
        .cloned()
        .collect()
}

/// Check a dialog for structural problems.
pub fn validate(dialog: &Dialog) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if dialog.is_empty() {
        warnings.push(Warning::NoNodes);
    }
    if !dialog.entries.is_empty() && normalize_starts(dialog).is_empty() {
        warnings.push(Warning::NoStarts);
    }

    check_resref(&mut warnings, "EndConversation", &dialog.script_end);
    check_resref(&mut warnings, "EndConverAbort", &dialog.script_abort);

    let mut seen = HashSet::new();
    for (i, start) in dialog.starts.iter().enumerate() {
        if start.index == UNSET_INDEX {
            warnings.push(Warning::UnsetStart { start: i });
        } else if start.index as usize >= dialog.entries.len() {
            warnings.push(Warning::StartOutOfRange {
                start: i,
                index: start.index,
            });
        } else if !seen.insert(start.index) {
            warnings.push(Warning::DuplicateStart {
                start: i,
                index: start.index,
            });
        }
        check_resref(
            &mut warnings,
            &format!("start {} Active", i),
            &start.script_appears,
        );
    }

    for kind in [NodeKind::Entry, NodeKind::Reply] {
        for (i, node) in dialog.nodes(kind).iter().enumerate() {
            check_node(&mut warnings, dialog, kind, i, node);
        }
    }

    warnings
}

fn check_node(
    warnings: &mut Vec<Warning>,
    dialog: &Dialog,
    kind: NodeKind,
    index: usize,
    node: &DialogNode,
) {
    let name = kind.name();
    check_resref(warnings, &format!("{} {} Script", name, index), &node.script_action);
    check_resref(warnings, &format!("{} {} Sound", name, index), &node.sound);

    if node.quest.is_empty() && node.quest_entry != 0 {
        warnings.push(Warning::QuestEntryWithoutQuest { kind, node: index });
    }

    for (p, pointer) in node.pointers.iter().enumerate() {
        if dialog.target(kind, pointer).is_none() {
            warnings.push(Warning::PointerOutOfRange {
                kind,
                node: index,
                pointer: p,
                index: pointer.index,
            });
        }
        check_resref(
            warnings,
            &format!("{} {} pointer {} Active", name, index, p),
            &pointer.script_appears,
        );
    }
}

fn check_resref(warnings: &mut Vec<Warning>, location: &str, value: &str) {
    if value.len() > RESREF_MAX_LEN {
        warnings.push(Warning::ResRefTooLong {
            location: location.to_string(),
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog_with_starts(entries: usize, starts: &[u32]) -> Dialog {
        let mut dlg = Dialog::new();
        for i in 0..entries {
            dlg.add_entry(DialogNode::entry(format!("line {}", i)));
        }
        for &s in starts {
            dlg.add_start(Pointer::new(s));
        }
        dlg
    }

    #[test]
    fn test_normalize_keeps_valid_starts_in_order() {
        let dlg = dialog_with_starts(3, &[2, 0, 1]);
        let starts: Vec<u32> = normalize_starts(&dlg).iter().map(|s| s.index).collect();
        assert_eq!(starts, vec![2, 0, 1]);
    }

    #[test]
    fn test_normalize_drops_unset_out_of_range_and_duplicates() {
        let dlg = dialog_with_starts(2, &[1, UNSET_INDEX, 5, 1, 0, 0]);
        let starts: Vec<u32> = normalize_starts(&dlg).iter().map(|s| s.index).collect();
        assert_eq!(starts, vec![1, 0]);
        // The dialog itself is untouched.
        assert_eq!(dlg.starts.len(), 6);
    }

    #[test]
    fn test_normalize_keeps_first_duplicate_with_its_conditions() {
        let mut dlg = dialog_with_starts(1, &[]);
        dlg.add_start(Pointer::new(0).with_condition("first"));
        dlg.add_start(Pointer::new(0).with_condition("second"));
        let starts = normalize_starts(&dlg);
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].script_appears, "first");
    }

    #[test]
    fn test_clean_dialog_has_no_warnings() {
        let mut dlg = dialog_with_starts(1, &[0]);
        let mut reply = DialogNode::reply("Bye");
        reply.add_pointer(Pointer::new(0));
        dlg.add_reply(reply);
        dlg.entries[0].add_pointer(Pointer::new(0));
        assert!(validate(&dlg).is_empty());
    }

    #[test]
    fn test_empty_dialog() {
        assert_eq!(validate(&Dialog::new()), vec![Warning::NoNodes]);
    }

    #[test]
    fn test_start_warnings() {
        let dlg = dialog_with_starts(2, &[UNSET_INDEX, 4, 1, 1]);
        let warnings = validate(&dlg);
        assert_eq!(
            warnings,
            vec![
                Warning::UnsetStart { start: 0 },
                Warning::StartOutOfRange { start: 1, index: 4 },
                Warning::DuplicateStart { start: 3, index: 1 },
            ]
        );
    }

    #[test]
    fn test_no_starts() {
        let dlg = dialog_with_starts(1, &[UNSET_INDEX]);
        let warnings = validate(&dlg);
        assert!(warnings.contains(&Warning::NoStarts));
        assert!(warnings.contains(&Warning::UnsetStart { start: 0 }));
    }

    #[test]
    fn test_pointer_out_of_range() {
        let mut dlg = dialog_with_starts(1, &[0]);
        dlg.entries[0].add_pointer(Pointer::new(3));
        let mut reply = DialogNode::reply("?");
        reply.add_pointer(Pointer::new(0));
        reply.add_pointer(Pointer::link(9, "broken"));
        dlg.add_reply(reply);

        let warnings = validate(&dlg);
        assert_eq!(
            warnings,
            vec![
                Warning::PointerOutOfRange {
                    kind: NodeKind::Entry,
                    node: 0,
                    pointer: 0,
                    index: 3
                },
                Warning::PointerOutOfRange {
                    kind: NodeKind::Reply,
                    node: 0,
                    pointer: 1,
                    index: 9
                },
            ]
        );
        assert_eq!(
            warnings[0].to_string(),
            "Entry 0 pointer 0 targets missing Reply 3"
        );
    }

    #[test]
    fn test_long_resref_and_orphan_quest_entry() {
        let mut dlg = dialog_with_starts(1, &[0]);
        dlg.entries[0].script_action = "a_script_name_too_long".to_string();
        dlg.entries[0].quest_entry = 3;

        let warnings = validate(&dlg);
        assert_eq!(warnings.len(), 2);
        assert!(matches!(
            &warnings[0],
            Warning::ResRefTooLong { location, .. } if location == "Entry 0 Script"
        ));
        assert_eq!(
            warnings[1],
            Warning::QuestEntryWithoutQuest {
                kind: NodeKind::Entry,
                node: 0
            }
        );
    }
}
