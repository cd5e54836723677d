//! XML interchange for dialogs.
//!
//! Every value is carried in attributes, so the document survives any
//! whitespace handling:
//!
//! ```xml
//! <Dialog DelayEntry="0" DelayReply="0" NumWords="2" EndConversation="" EndConverAbort="" PreventZoomIn="false">
//!     <Entries>
//!         <Entry Speaker="" Animation="0" AnimLoop="false" Script="" Delay="0" Comment="" Sound="" Quest="" QuestEntry="0">
//!             <Text>
//!                 <String Language="0" Value="Hello"/>
//!             </Text>
//!             <Pointer Index="0" IsLink="false" Active="" LinkComment=""/>
//!         </Entry>
//!     </Entries>
//!     <Replies>...</Replies>
//!     <Starts>
//!         <Start Index="0" Active=""/>
//!     </Starts>
//! </Dialog>
//! ```

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::io::{BufRead, Cursor, Write};

use crate::dlg::label;
use crate::error::{Error, Result};
use crate::types::{Dialog, DialogNode, LocString, NodeKind, Param, Pointer, NO_STR_REF};

const DIALOG: &str = "Dialog";
const ENTRIES: &str = "Entries";
const REPLIES: &str = "Replies";
const STARTS: &str = "Starts";
const START: &str = "Start";
const POINTER: &str = "Pointer";
const PARAM: &str = "Param";
const STRING: &str = "String";
const STR_REF: &str = "StrRef";
const LANGUAGE: &str = "Language";
const IS_LINK: &str = "IsLink";

/// Element tree used on both sides of the conversion.
#[derive(Debug, Clone, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn attr(mut self, name: &str, value: impl ToString) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn string(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    fn u32_or(&self, name: &str, default: u32) -> Result<u32> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|_| {
                Error::InvalidXml(format!(
                    "<{}> attribute {}={:?} is not an unsigned integer",
                    self.name, name, value
                ))
            }),
        }
    }

    fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.get(name).map(str::trim) {
            None => Ok(default),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
            Some(v) => Err(Error::InvalidXml(format!(
                "<{}> attribute {}={:?} is not a boolean",
                self.name, name, v
            ))),
        }
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn first_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut elem = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            elem.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() {
            writer
                .write_event(Event::Empty(elem))
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        } else {
            writer
                .write_event(Event::Start(elem.borrow()))
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            for child in &self.children {
                child.write(writer)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(self.name.as_str())))
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        }
        Ok(())
    }
}

/// Parse a start or empty tag into an element without children.
fn parse_start_element(e: &BytesStart) -> Result<Element> {
    let mut element = Element::new(&String::from_utf8_lossy(e.name().as_ref()));
    for attr_result in e.attributes() {
        let attr =
            attr_result.map_err(|e| Error::InvalidXml(format!("Attribute error: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::InvalidXml(format!("Attribute value error: {}", e)))?
            .to_string();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn read_tree<R: BufRead>(reader: R) -> Result<Element> {
    let mut xml_reader = Reader::from_reader(reader);
    let mut buf = Vec::new();
    let mut root: Option<Element> = None;
    let mut stack: Vec<Element> = Vec::new();

    loop {
        match xml_reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(parse_start_element(e)?),
            Ok(Event::Empty(ref e)) => {
                let element = parse_start_element(e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
            }
            Ok(Event::Eof) => break,
            // Text, comments and declarations carry nothing.
            Ok(_) => {}
            Err(e) => return Err(Error::InvalidXml(format!("XML parse error: {}", e))),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::InvalidXml(format!(
            "unclosed element <{}>",
            stack[stack.len() - 1].name
        )));
    }
    root.ok_or_else(|| Error::InvalidXml("document has no root element".to_string()))
}

// ============================================================================
// Dialog -> elements
// ============================================================================

fn params_element(name: &str, params: &[Param]) -> Element {
    let mut element = Element::new(name);
    element.children = params.iter().map(param_element).collect();
    element
}

fn param_element(param: &Param) -> Element {
    Element::new(PARAM)
        .attr(label::KEY, &param.key)
        .attr(label::VALUE, &param.value)
}

fn text_element(text: &LocString) -> Element {
    let mut element = Element::new(label::TEXT);
    if text.str_ref != NO_STR_REF {
        element = element.attr(STR_REF, text.str_ref);
    }
    element.children = text
        .strings
        .iter()
        .map(|(language, value)| {
            Element::new(STRING)
                .attr(LANGUAGE, language)
                .attr(label::VALUE, value)
        })
        .collect();
    element
}

fn pointer_element(pointer: &Pointer) -> Element {
    let mut element = Element::new(POINTER)
        .attr(label::INDEX, pointer.index)
        .attr(IS_LINK, pointer.is_link)
        .attr(label::ACTIVE, &pointer.script_appears)
        .attr(label::LINK_COMMENT, &pointer.link_comment);
    element.children = pointer.condition_params.iter().map(param_element).collect();
    element
}

fn node_element(node: &DialogNode, kind: NodeKind) -> Element {
    let mut element = Element::new(kind.name())
        .attr(label::SPEAKER, &node.speaker)
        .attr(label::ANIMATION, node.animation)
        .attr(label::ANIM_LOOP, node.animation_loop)
        .attr(label::SCRIPT, &node.script_action)
        .attr(label::DELAY, node.delay)
        .attr(label::COMMENT, &node.comment)
        .attr(label::SOUND, &node.sound)
        .attr(label::QUEST, &node.quest)
        .attr(label::QUEST_ENTRY, node.quest_entry);

    element.children.push(text_element(&node.text));
    if !node.action_params.is_empty() {
        element
            .children
            .push(params_element(label::ACTION_PARAMS, &node.action_params));
    }
    element
        .children
        .extend(node.pointers.iter().map(pointer_element));
    element
}

fn dialog_element(dialog: &Dialog) -> Element {
    let mut root = Element::new(DIALOG)
        .attr(label::DELAY_ENTRY, dialog.delay_entry)
        .attr(label::DELAY_REPLY, dialog.delay_reply)
        .attr(label::NUM_WORDS, dialog.num_words)
        .attr(label::END_CONVERSATION, &dialog.script_end)
        .attr(label::END_CONVER_ABORT, &dialog.script_abort)
        .attr(label::PREVENT_ZOOM_IN, dialog.prevent_zoom_in);

    let mut entries = Element::new(ENTRIES);
    entries.children = dialog
        .entries
        .iter()
        .map(|n| node_element(n, NodeKind::Entry))
        .collect();
    let mut replies = Element::new(REPLIES);
    replies.children = dialog
        .replies
        .iter()
        .map(|n| node_element(n, NodeKind::Reply))
        .collect();
    let mut starts = Element::new(STARTS);
    starts.children = dialog
        .starts
        .iter()
        .map(|s| {
            let mut start = Element::new(START)
                .attr(label::INDEX, s.index)
                .attr(label::ACTIVE, &s.script_appears);
            start.children = s.condition_params.iter().map(param_element).collect();
            start
        })
        .collect();

    root.children = vec![entries, replies, starts];
    root
}

// ============================================================================
// Elements -> Dialog
// ============================================================================

fn read_params(element: &Element) -> Vec<Param> {
    element
        .children_named(PARAM)
        .map(|p| Param {
            key: p.string(label::KEY),
            value: p.string(label::VALUE),
        })
        .collect()
}

fn read_text(element: Option<&Element>) -> Result<LocString> {
    let Some(element) = element else {
        return Ok(LocString::default());
    };
    let mut strings = BTreeMap::new();
    for s in element.children_named(STRING) {
        strings.insert(s.u32_or(LANGUAGE, 0)?, s.string(label::VALUE));
    }
    Ok(LocString {
        str_ref: element.u32_or(STR_REF, NO_STR_REF)?,
        strings,
    })
}

fn read_pointer(element: &Element) -> Result<Pointer> {
    Ok(Pointer {
        index: element.u32_or(label::INDEX, 0)?,
        is_link: element.bool_or(IS_LINK, false)?,
        script_appears: element.string(label::ACTIVE),
        link_comment: element.string(label::LINK_COMMENT),
        condition_params: read_params(element),
    })
}

fn read_node(element: &Element, kind: NodeKind) -> Result<DialogNode> {
    Ok(DialogNode {
        kind,
        text: read_text(element.first_child(label::TEXT))?,
        speaker: element.string(label::SPEAKER),
        animation: element.u32_or(label::ANIMATION, 0)?,
        animation_loop: element.bool_or(label::ANIM_LOOP, false)?,
        script_action: element.string(label::SCRIPT),
        delay: element.u32_or(label::DELAY, 0)?,
        comment: element.string(label::COMMENT),
        sound: element.string(label::SOUND),
        quest: element.string(label::QUEST),
        quest_entry: element.u32_or(label::QUEST_ENTRY, 0)?,
        action_params: element
            .first_child(label::ACTION_PARAMS)
            .map(read_params)
            .unwrap_or_default(),
        pointers: element
            .children_named(POINTER)
            .map(read_pointer)
            .collect::<Result<Vec<_>>>()?,
    })
}

fn read_nodes(root: &Element, container: &str, kind: NodeKind) -> Result<Vec<DialogNode>> {
    match root.first_child(container) {
        Some(list) => list
            .children_named(kind.name())
            .map(|n| read_node(n, kind))
            .collect(),
        None => Ok(Vec::new()),
    }
}

impl Dialog {
    /// Convert the dialog to an XML string.
    pub fn to_xml(&self) -> Result<String> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_xml_to(&mut buffer)?;
        String::from_utf8(buffer.into_inner()).map_err(|e| Error::InvalidXml(e.to_string()))
    }

    /// Write the dialog as XML to a writer.
    pub fn write_xml_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut xml_writer = Writer::new_with_indent(writer, b' ', 4);

        xml_writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        xml_writer.get_mut().write_all(b"\n").map_err(Error::Io)?;

        dialog_element(self).write(&mut xml_writer)
    }

    /// Parse a dialog from an XML string.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Self::from_xml_reader(xml.as_bytes())
    }

    /// Parse a dialog from XML.
    ///
    /// Missing attributes take their defaults; unknown elements and
    /// attributes are ignored.
    pub fn from_xml_reader<R: BufRead>(reader: R) -> Result<Self> {
        let root = read_tree(reader)?;
        if root.name != DIALOG {
            return Err(Error::InvalidXml(format!(
                "expected <{}> root element, found <{}>",
                DIALOG, root.name
            )));
        }

        let starts = match root.first_child(STARTS) {
            Some(list) => list
                .children_named(START)
                .map(read_pointer)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Dialog {
            delay_entry: root.u32_or(label::DELAY_ENTRY, 0)?,
            delay_reply: root.u32_or(label::DELAY_REPLY, 0)?,
            num_words: root.u32_or(label::NUM_WORDS, 0)?,
            script_end: root.string(label::END_CONVERSATION),
            script_abort: root.string(label::END_CONVER_ABORT),
            prevent_zoom_in: root.bool_or(label::PREVENT_ZOOM_IN, false)?,
            entries: read_nodes(&root, ENTRIES, NodeKind::Entry)?,
            replies: read_nodes(&root, REPLIES, NodeKind::Reply)?,
            starts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dialog {
        let mut dlg = Dialog::new();
        dlg.num_words = 3;
        dlg.script_end = "nw_walk_wp".to_string();
        dlg.prevent_zoom_in = true;

        let mut entry = DialogNode::entry("Hello & <welcome>");
        entry.speaker = "innkeeper".to_string();
        entry.text.set(2, "Bonjour \"ami\"");
        entry.set_quest("q_inn", 10);
        entry.add_action_param(Param::new("gold", "5"));
        let mut pointer = Pointer::new(0).with_condition("is_friendly");
        pointer.add_condition_param(Param::new("mood", "good"));
        entry.add_pointer(pointer);
        dlg.add_entry(entry);

        let mut reply = DialogNode::reply("Hi");
        reply.add_pointer(Pointer::link(0, "back to greeting"));
        dlg.add_reply(reply);

        let mut start = Pointer::new(0);
        start.add_condition_param(Param::new("first", "1"));
        dlg.add_start(start);
        dlg
    }

    #[test]
    fn test_xml_roundtrip() {
        let dlg = sample();
        let xml = dlg.to_xml().unwrap();
        let parsed = Dialog::from_xml(&xml).unwrap();
        assert_eq!(parsed, dlg);
    }

    #[test]
    fn test_xml_layout() {
        let xml = sample().to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("<Dialog DelayEntry=\"0\""));
        assert!(xml.contains("<Entries>"));
        assert!(xml.contains("<Reply Speaker=\"\""));
        assert!(xml.contains("IsLink=\"true\""));
        assert!(xml.contains("PreventZoomIn=\"true\""));
        assert!(xml.contains("&amp; &lt;welcome&gt;"));
        // Custom text has no talk-table reference to write.
        assert!(!xml.contains("StrRef"));
    }

    #[test]
    fn test_empty_dialog_roundtrip() {
        let dlg = Dialog::new();
        let parsed = Dialog::from_xml(&dlg.to_xml().unwrap()).unwrap();
        assert_eq!(parsed, dlg);
    }

    #[test]
    fn test_str_ref_roundtrip() {
        let mut dlg = Dialog::new();
        let mut entry = DialogNode::default();
        entry.text.str_ref = 1234;
        dlg.add_entry(entry);
        let xml = dlg.to_xml().unwrap();
        assert!(xml.contains("StrRef=\"1234\""));
        assert_eq!(Dialog::from_xml(&xml).unwrap(), dlg);
    }

    #[test]
    fn test_missing_attributes_default() {
        let xml = r#"<Dialog><Entries><Entry><Pointer Index="0"/></Entry></Entries></Dialog>"#;
        let dlg = Dialog::from_xml(xml).unwrap();
        assert_eq!(dlg.entries.len(), 1);
        assert_eq!(dlg.entries[0].text, LocString::default());
        assert_eq!(dlg.entries[0].pointers, vec![Pointer::new(0)]);
        assert!(dlg.replies.is_empty());
        assert!(dlg.starts.is_empty());
    }

    #[test]
    fn test_wrong_root_is_rejected() {
        assert!(matches!(
            Dialog::from_xml("<Conversation/>"),
            Err(Error::InvalidXml(_))
        ));
    }

    #[test]
    fn test_bad_number_is_rejected() {
        let xml = r#"<Dialog NumWords="many"/>"#;
        assert!(matches!(Dialog::from_xml(xml), Err(Error::InvalidXml(_))));
    }

    #[test]
    fn test_empty_document_is_rejected() {
        assert!(matches!(Dialog::from_xml(""), Err(Error::InvalidXml(_))));
    }
}
