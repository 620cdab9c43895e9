//! Chunk metadata: the element tree describing every type in effect.
//!
//! The metadata event holds a string table followed by a tree of elements.
//! Each element is a string-table index for its name, a list of key/value
//! attribute pairs, and child elements. Only `class` and `field` elements
//! matter here; everything else is walked and dropped.

use crate::reader::JfrReader;
use crate::{ParseError, Result};

#[derive(Debug, Clone)]
pub(crate) struct TypeDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone)]
pub(crate) struct FieldDescriptor {
    pub type_id: i64,
    pub constant_pool: bool,
}

enum Element {
    Class { id: i64, descriptor: TypeDescriptor },
    Field(FieldDescriptor),
    Other,
}

impl JfrReader {
    /// Parses the metadata event at the given absolute offset, registering
    /// every described type. Called once per chunk, before any constant
    /// pool or event is read.
    pub(crate) fn read_metadata(&mut self, offset: usize) -> Result<()> {
        self.buf.set_pos(offset)?;
        let _size = self.buf.varint()?;
        let _type_id = self.buf.varlong()?;
        let _start_time = self.buf.varlong()?;
        let _duration = self.buf.varlong()?;
        let _metadata_id = self.buf.varlong()?;

        let count = self.buf.varint()?;
        if count < 0 {
            return Err(ParseError::MalformedMetadata("negative string count"));
        }
        let mut strings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            strings.push(self.get_string()?.unwrap_or_default());
        }

        self.read_element(&strings)?;
        Ok(())
    }

    fn read_element(&mut self, strings: &[String]) -> Result<Element> {
        let name = self.table_string(strings)?;

        let attribute_count = self.buf.varint()?;
        let mut attributes = Vec::with_capacity(attribute_count.max(0) as usize);
        for _ in 0..attribute_count {
            let key = self.table_string(strings)?.to_string();
            let value = self.table_string(strings)?.to_string();
            attributes.push((key, value));
        }

        let mut element = create_element(name, attributes)?;

        let child_count = self.buf.varint()?;
        for _ in 0..child_count {
            let child = self.read_element(strings)?;
            if let (Element::Class { descriptor, .. }, Element::Field(field)) =
                (&mut element, child)
            {
                descriptor.fields.push(field);
            }
        }

        if let Element::Class { id, descriptor } = element {
            self.types_by_name.insert(descriptor.name.clone(), id);
            self.types.insert(id, descriptor);
            return Ok(Element::Other);
        }
        Ok(element)
    }

    fn table_string<'a>(&mut self, strings: &'a [String]) -> Result<&'a str> {
        let index = self.buf.varint()? as usize;
        strings
            .get(index)
            .map(String::as_str)
            .ok_or(ParseError::MalformedMetadata("string index out of range"))
    }
}

fn create_element(name: &str, attributes: Vec<(String, String)>) -> Result<Element> {
    match name {
        "class" => {
            let mut id = None;
            let mut descriptor = TypeDescriptor {
                name: String::new(),
                fields: Vec::new(),
            };
            for (key, value) in attributes {
                match key.as_str() {
                    "id" => id = value.parse().ok(),
                    "name" => descriptor.name = value,
                    _ => {}
                }
            }
            let id = id.ok_or(ParseError::MalformedMetadata("class without id"))?;
            Ok(Element::Class { id, descriptor })
        }
        "field" => {
            let mut type_id = 0;
            let mut constant_pool = false;
            for (key, value) in attributes {
                match key.as_str() {
                    "class" => type_id = value.parse().unwrap_or(0),
                    "constantPool" => constant_pool = value == "true",
                    _ => {}
                }
            }
            Ok(Element::Field(FieldDescriptor {
                type_id,
                constant_pool,
            }))
        }
        _ => Ok(Element::Other),
    }
}
