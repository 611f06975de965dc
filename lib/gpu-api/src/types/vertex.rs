use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

use crate::{AttributeType, MAX_ATTRIBUTES};

bitflags::bitflags! {
    pub struct AttributeFlags: u8 {
        /// The attribute advances per instance (input slot 1, step rate 1).
        const INSTANCED = 0x01;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Attribute {
    pub location: u8,
    pub byte_offset: u8,
    pub components: u8,
    pub ty: AttributeType,
    pub instanced: bool,
}

/// Vertex input layout, at most [`MAX_ATTRIBUTES`] attributes. A running
/// hash of the attribute array feeds the pipeline cache key.
#[derive(Clone, Copy, Debug)]
pub struct VertexDecl {
    attributes: [Attribute; MAX_ATTRIBUTES],
    count: u32,
    hash: u32,
}

impl Default for VertexDecl {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexDecl {
    pub fn new() -> Self {
        Self {
            attributes: [Attribute {
                location: 0,
                byte_offset: 0,
                components: 0,
                ty: AttributeType::Float,
                instanced: false,
            }; MAX_ATTRIBUTES],
            count: 0,
            hash: 0,
        }
    }

    pub fn add_attribute(
        &mut self,
        location: u8,
        byte_offset: u8,
        components: u8,
        ty: AttributeType,
        flags: AttributeFlags,
    ) {
        if self.count as usize >= MAX_ATTRIBUTES {
            debug_assert!(false, "too many vertex attributes");
            return;
        }
        self.attributes[self.count as usize] = Attribute {
            location,
            byte_offset,
            components,
            ty,
            instanced: flags.contains(AttributeFlags::INSTANCED),
        };
        self.count += 1;

        let mut hasher = FnvHasher::default();
        self.attributes[..self.count as usize].hash(&mut hasher);
        self.hash = hasher.finish() as u32;
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes[..self.count as usize]
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_tracks_every_attribute() {
        let mut a = VertexDecl::new();
        a.add_attribute(0, 0, 3, AttributeType::Float, AttributeFlags::empty());
        let one_attr = a.hash();
        a.add_attribute(1, 12, 4, AttributeType::U8, AttributeFlags::INSTANCED);
        assert_ne!(a.hash(), one_attr);

        let mut b = VertexDecl::new();
        b.add_attribute(0, 0, 3, AttributeType::Float, AttributeFlags::empty());
        b.add_attribute(1, 12, 4, AttributeType::U8, AttributeFlags::INSTANCED);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.attributes().len(), 2);
    }

    #[test]
    fn distinct_layouts_hash_differently() {
        let mut a = VertexDecl::new();
        a.add_attribute(0, 0, 3, AttributeType::Float, AttributeFlags::empty());
        let mut b = VertexDecl::new();
        b.add_attribute(0, 0, 2, AttributeType::Float, AttributeFlags::empty());
        assert_ne!(a.hash(), b.hash());
    }
}
