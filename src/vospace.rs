//! Minimal reader for VOSpace node documents: just the `<property>` list.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;

pub const CORE_PREFIX: &str = "ivo://ivoa.net/vospace/core#";

#[derive(Debug, thiserror::Error)]
#[error("malformed VOSpace node document: {0}")]
pub struct VospaceError(String);

#[derive(Debug, Default, Clone)]
pub struct NodeProperties {
    by_uri: HashMap<String, String>,
}

impl NodeProperties {
    pub fn parse(xml: &str) -> Result<Self, VospaceError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut by_uri = HashMap::new();
        let mut current: Option<(String, String)> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"property" => {
                    let uri = property_uri(&e)?;
                    current = uri.map(|uri| (uri, String::new()));
                }
                Ok(Event::Empty(e)) if e.local_name().as_ref() == b"property" => {
                    if let Some(uri) = property_uri(&e)? {
                        by_uri.insert(uri, String::new());
                    }
                }
                Ok(Event::Text(text)) => {
                    if let Some((_, value)) = current.as_mut() {
                        let unescaped = text.unescape().map_err(|e| VospaceError(e.to_string()))?;
                        value.push_str(&unescaped);
                    }
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == b"property" => {
                    if let Some((uri, value)) = current.take() {
                        by_uri.insert(uri, value);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(VospaceError(e.to_string())),
            }
        }

        Ok(Self { by_uri })
    }

    /// Look up a property from the core namespace by its short name
    /// ("quota", "length", "creator").
    pub fn core(&self, name: &str) -> Option<&str> {
        self.by_uri
            .get(&format!("{CORE_PREFIX}{name}"))
            .map(String::as_str)
    }

    pub fn core_u64(&self, name: &str) -> Option<u64> {
        self.core(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.by_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty()
    }
}

fn property_uri(start: &quick_xml::events::BytesStart<'_>) -> Result<Option<String>, VospaceError> {
    let attr = start
        .try_get_attribute("uri")
        .map_err(|e| VospaceError(e.to_string()))?;
    match attr {
        Some(attr) => attr
            .unescape_value()
            .map(|v| Some(v.into_owned()))
            .map_err(|e| VospaceError(e.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<vos:node xmlns:vos="http://www.ivoa.net/xml/VOSpace/v2.0"
          xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
          uri="vos://cadc.nrc.ca~arc/home/alice" xsi:type="vos:ContainerNode">
  <vos:properties>
    <vos:property uri="ivo://ivoa.net/vospace/core#quota">10737418240</vos:property>
    <vos:property uri="ivo://ivoa.net/vospace/core#length">2147483648</vos:property>
    <vos:property uri="ivo://ivoa.net/vospace/core#creator">CN=alice &amp; co,OU=cadc</vos:property>
    <vos:property uri="ivo://ivoa.net/vospace/core#groupwrite"/>
    <vos:property uri="ivo://cadc.nrc.ca/vospace/core#inheritPermissions">true</vos:property>
  </vos:properties>
  <vos:nodes/>
</vos:node>"#;

    #[test]
    fn reads_core_properties() {
        let props = NodeProperties::parse(NODE).unwrap();
        assert_eq!(props.len(), 5);
        assert_eq!(props.core_u64("quota"), Some(10_737_418_240));
        assert_eq!(props.core_u64("length"), Some(2_147_483_648));
        assert_eq!(props.core("creator"), Some("CN=alice & co,OU=cadc"));
        assert_eq!(props.core("groupwrite"), Some(""));
        assert_eq!(props.core("inheritPermissions"), None);
    }

    #[test]
    fn missing_properties_are_none() {
        let props = NodeProperties::parse("<vos:node xmlns:vos=\"x\"/>").unwrap();
        assert!(props.is_empty());
        assert_eq!(props.core_u64("quota"), None);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(NodeProperties::parse("<vos:node><vos:property uri=\"a\">1</vos:nodes>").is_err());
    }
}
