//! In-memory document tree and its XML text form.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::error::CodecError;

/// One element of the exported document: tag, ordered attributes,
/// ordered children and an optional text body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<DocumentNode>,
    text: Option<String>,
}

impl DocumentNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[cfg(test)]
    pub fn with_child(mut self, child: DocumentNode) -> Self {
        self.children.push(child);
        self
    }

    /// Sets `key`, replacing an earlier value in place.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn push(&mut self, child: DocumentNode) {
        self.children.push(child);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, or "" when absent.
    pub fn attr_or_empty(&self, key: &str) -> &str {
        self.attr(key).unwrap_or("")
    }

    #[cfg(test)]
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[cfg(test)]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn text_content(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn children(&self) -> &[DocumentNode] {
        &self.children
    }

    /// First direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&DocumentNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DocumentNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn to_xml(&self) -> Result<String, CodecError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.write_into(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| CodecError::malformed(format!("document is not UTF-8: {}", e)))
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), CodecError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.text.is_none() && self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        if let Some(text) = &self.text {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }

    /// Parses XML text into a tree. Element names lose their namespace
    /// prefix and `xmlns` declarations are dropped.
    pub fn parse(xml: &str) -> Result<DocumentNode, CodecError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<DocumentNode> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(Self::open(&e)?),
                Event::Empty(e) => {
                    let node = Self::open(&e)?;
                    Self::attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| CodecError::malformed("unbalanced end tag"))?;
                    Self::attach(&mut stack, &mut root, node)?;
                }
                Event::Text(e) => {
                    if let Some(top) = stack.last_mut() {
                        let text = e.unescape().map_err(quick_xml::Error::from)?;
                        top.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                Event::CData(e) => {
                    if let Some(top) = stack.last_mut() {
                        top.text
                            .get_or_insert_with(String::new)
                            .push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(CodecError::malformed("unclosed element at end of document"));
        }
        root.ok_or_else(|| CodecError::malformed("document has no root element"))
    }

    fn open(e: &BytesStart<'_>) -> Result<DocumentNode, CodecError> {
        let mut node = DocumentNode::new(String::from_utf8_lossy(e.local_name().as_ref()));
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
            node.attributes.push((key, value.into_owned()));
        }
        Ok(node)
    }

    fn attach(
        stack: &mut [DocumentNode],
        root: &mut Option<DocumentNode>,
        mut node: DocumentNode,
    ) -> Result<(), CodecError> {
        if !node.children.is_empty()
            && node.text.as_deref().is_some_and(|t| t.trim().is_empty())
        {
            node.text = None;
        }
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None if root.is_none() => *root = Some(node),
            None => return Err(CodecError::malformed("more than one root element")),
        }
        Ok(())
    }
}
