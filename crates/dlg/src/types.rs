//! Core dialog data types.
//!
//! A [`Dialog`] is a bipartite graph stored as two flat arrays. Entries (NPC
//! lines) point at replies, replies point at entries, and the starting list
//! points at entries. Every edge is a [`Pointer`] holding a *local* index into
//! the opposite array, so cycles need no special handling.

use std::collections::BTreeMap;

/// StrRef value meaning "no talk-table reference, use the embedded strings".
pub const NO_STR_REF: u32 = 0xFFFF_FFFF;

/// Start index value meaning "unset". Dropped by start normalization.
pub const UNSET_INDEX: u32 = 0xFFFF_FFFF;

/// Which node array a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeKind {
    /// NPC line, lives in [`Dialog::entries`].
    #[default]
    Entry,
    /// PC line, lives in [`Dialog::replies`].
    Reply,
}

impl NodeKind {
    /// The kind that pointers from this kind target.
    pub fn opposite(self) -> Self {
        match self {
            NodeKind::Entry => NodeKind::Reply,
            NodeKind::Reply => NodeKind::Entry,
        }
    }

    /// Human readable name.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Entry => "Entry",
            NodeKind::Reply => "Reply",
        }
    }
}

/// A localized string: an optional talk-table reference plus per-language text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocString {
    /// Talk-table reference, [`NO_STR_REF`] for custom text.
    pub str_ref: u32,
    /// Substrings keyed by language id.
    pub strings: BTreeMap<u32, String>,
}

impl Default for LocString {
    fn default() -> Self {
        Self {
            str_ref: NO_STR_REF,
            strings: BTreeMap::new(),
        }
    }
}

impl LocString {
    /// Create a localized string with a single language-0 substring.
    pub fn new(text: impl Into<String>) -> Self {
        let mut strings = BTreeMap::new();
        strings.insert(0, text.into());
        Self {
            str_ref: NO_STR_REF,
            strings,
        }
    }

    /// Get the text for a language id.
    pub fn get(&self, language: u32) -> Option<&str> {
        self.strings.get(&language).map(String::as_str)
    }

    /// Set the text for a language id.
    pub fn set(&mut self, language: u32, text: impl Into<String>) {
        self.strings.insert(language, text.into());
    }

    /// Language 0 text, or the first substring, or "".
    pub fn text(&self) -> &str {
        self.get(0)
            .or_else(|| self.strings.values().next().map(String::as_str))
            .unwrap_or("")
    }

    /// True when there is no talk-table reference and no non-empty substring.
    pub fn is_empty(&self) -> bool {
        self.str_ref == NO_STR_REF && self.strings.values().all(|s| s.is_empty())
    }
}

/// A key/value script parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A directed edge to a node of the opposite kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pointer {
    /// Local index into the target array.
    pub index: u32,
    /// Soft reference to content that is defined elsewhere in the tree.
    pub is_link: bool,
    /// Conditional script deciding whether the target is shown.
    pub script_appears: String,
    /// Comment on a link. Only written when `is_link` is set.
    pub link_comment: String,
    /// Parameters passed to `script_appears`.
    pub condition_params: Vec<Param>,
}

impl Pointer {
    /// Create a primary-branch pointer.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Create a link pointer with a comment.
    pub fn link(index: u32, comment: impl Into<String>) -> Self {
        Self {
            index,
            is_link: true,
            link_comment: comment.into(),
            ..Self::default()
        }
    }

    /// Set the appearance script.
    pub fn with_condition(mut self, script: impl Into<String>) -> Self {
        self.script_appears = script.into();
        self
    }

    /// Add a condition parameter.
    pub fn add_condition_param(&mut self, param: Param) {
        self.condition_params.push(param);
    }
}

/// An entry or reply line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DialogNode {
    pub kind: NodeKind,
    pub text: LocString,
    /// Speaker tag. Entries only; ignored for replies.
    pub speaker: String,
    pub animation: u32,
    pub animation_loop: bool,
    /// Script run when the node is shown.
    pub script_action: String,
    pub delay: u32,
    pub comment: String,
    pub sound: String,
    /// Journal quest tag. `quest_entry` is only written when this is non-empty.
    pub quest: String,
    pub quest_entry: u32,
    pub action_params: Vec<Param>,
    /// Edges to the opposite node kind.
    pub pointers: Vec<Pointer>,
}

impl DialogNode {
    /// Create a node of the given kind with language-0 text.
    pub fn new(kind: NodeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: LocString::new(text),
            ..Self::default()
        }
    }

    /// Create an entry (NPC line).
    pub fn entry(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Entry, text)
    }

    /// Create a reply (PC line).
    pub fn reply(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Reply, text)
    }

    /// Add an outgoing pointer.
    pub fn add_pointer(&mut self, pointer: Pointer) {
        self.pointers.push(pointer);
    }

    /// Add an action parameter.
    pub fn add_action_param(&mut self, param: Param) {
        self.action_params.push(param);
    }

    /// Set the quest tag and journal entry.
    pub fn set_quest(&mut self, quest: impl Into<String>, entry: u32) {
        self.quest = quest.into();
        self.quest_entry = entry;
    }

    pub fn has_quest(&self) -> bool {
        !self.quest.is_empty()
    }

    /// A node with neither text nor comment. Valid: the engine treats it as a
    /// "[CONTINUE]" line.
    pub fn is_continue(&self) -> bool {
        self.text.is_empty() && self.comment.is_empty()
    }
}

/// A conversation file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dialog {
    pub delay_entry: u32,
    pub delay_reply: u32,
    pub num_words: u32,
    /// Script run when the conversation ends normally.
    pub script_end: String,
    /// Script run when the conversation is aborted.
    pub script_abort: String,
    pub prevent_zoom_in: bool,
    pub entries: Vec<DialogNode>,
    pub replies: Vec<DialogNode>,
    /// Starting pointers into `entries`.
    pub starts: Vec<Pointer>,
}

impl Dialog {
    /// Create an empty dialog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its local index.
    pub fn add_entry(&mut self, mut node: DialogNode) -> u32 {
        node.kind = NodeKind::Entry;
        self.entries.push(node);
        (self.entries.len() - 1) as u32
    }

    /// Append a reply and return its local index.
    pub fn add_reply(&mut self, mut node: DialogNode) -> u32 {
        node.kind = NodeKind::Reply;
        self.replies.push(node);
        (self.replies.len() - 1) as u32
    }

    /// Add a starting pointer to an entry.
    pub fn add_start(&mut self, start: Pointer) {
        self.starts.push(start);
    }

    /// The node array for a kind.
    pub fn nodes(&self, kind: NodeKind) -> &[DialogNode] {
        match kind {
            NodeKind::Entry => &self.entries,
            NodeKind::Reply => &self.replies,
        }
    }

    /// Resolve a pointer leaving a node of `from` kind.
    pub fn target(&self, from: NodeKind, pointer: &Pointer) -> Option<&DialogNode> {
        self.nodes(from.opposite()).get(pointer.index as usize)
    }

    /// Total number of entries and replies.
    pub fn node_count(&self) -> usize {
        self.entries.len() + self.replies.len()
    }

    /// Total number of pointers, including starts.
    pub fn pointer_count(&self) -> usize {
        self.entries
            .iter()
            .chain(&self.replies)
            .map(|n| n.pointers.len())
            .sum::<usize>()
            + self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.replies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loc_string_text_fallbacks() {
        let mut s = LocString::default();
        assert!(s.is_empty());
        assert_eq!(s.text(), "");

        s.set(2, "Bonjour");
        assert_eq!(s.text(), "Bonjour");
        s.set(0, "Hello");
        assert_eq!(s.text(), "Hello");
        assert!(!s.is_empty());
    }

    #[test]
    fn test_add_nodes_sets_kind() {
        let mut dlg = Dialog::new();
        let e = dlg.add_entry(DialogNode::reply("wrong kind"));
        let r = dlg.add_reply(DialogNode::entry("wrong kind"));
        assert_eq!(dlg.entries[e as usize].kind, NodeKind::Entry);
        assert_eq!(dlg.replies[r as usize].kind, NodeKind::Reply);
    }

    #[test]
    fn test_target_resolution_with_cycle() {
        let mut dlg = Dialog::new();
        let mut entry = DialogNode::entry("Hello");
        entry.add_pointer(Pointer::new(0));
        dlg.add_entry(entry);
        let mut reply = DialogNode::reply("Again");
        reply.add_pointer(Pointer::link(0, "back"));
        dlg.add_reply(reply);

        let to_reply = dlg.target(NodeKind::Entry, &dlg.entries[0].pointers[0]);
        assert_eq!(to_reply.map(|n| n.text.text()), Some("Again"));
        let back = dlg.target(NodeKind::Reply, &dlg.replies[0].pointers[0]);
        assert_eq!(back.map(|n| n.text.text()), Some("Hello"));
        assert_eq!(dlg.pointer_count(), 2);
    }

    #[test]
    fn test_continue_node() {
        let node = DialogNode::default();
        assert!(node.is_continue());
        let mut node = DialogNode::entry("");
        node.comment = "note".into();
        assert!(!node.is_continue());
    }
}
