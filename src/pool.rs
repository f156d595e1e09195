//! The constant pool: value pools, namespaces, namespace sets, and multinames.

// Copyright 2020 Google Inc. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::indices::{MultinameId, NamespaceId, NsSetId, StringId};
use crate::io::{self, Decode, DecodeError, DecodeErrorKind, Encode, Reader};
use std::collections::HashMap;

const KIND_QNAME: u8 = 0x07;
const KIND_QNAME_A: u8 = 0x0D;
const KIND_RTQNAME: u8 = 0x0F;
const KIND_RTQNAME_A: u8 = 0x10;
const KIND_RTQNAME_L: u8 = 0x11;
const KIND_RTQNAME_LA: u8 = 0x12;
const KIND_MULTINAME: u8 = 0x09;
const KIND_MULTINAME_A: u8 = 0x0E;
const KIND_MULTINAME_L: u8 = 0x1B;
const KIND_MULTINAME_LA: u8 = 0x1C;
const KIND_TYPENAME: u8 = 0x1D;

/// A namespace entry: a kind byte plus a name in the string pool.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct Namespace {
    pub kind: u8,
    pub name: StringId,
}

impl Namespace {
    pub const KIND_PRIVATE: u8 = 0x05;
    pub const KIND_NAMESPACE: u8 = 0x08;
    pub const KIND_PACKAGE: u8 = 0x16;
    pub const KIND_PACKAGE_INTERNAL: u8 = 0x17;
    pub const KIND_PROTECTED: u8 = 0x18;
    pub const KIND_EXPLICIT: u8 = 0x19;
    pub const KIND_STATIC_PROTECTED: u8 = 0x1A;

    /// The reserved entry at index 0: matches any namespace.
    pub const ANY: Self = Self {
        kind: 0,
        name: StringId::ZERO,
    };
}

impl Encode for Namespace {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_u8(w, self.kind)?;
        self.name.encode(w)
    }
}

impl Decode for Namespace {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            kind: r.read_u8()?,
            name: StringId::decode(r)?,
        })
    }
}

/// An ordered set of namespace indices.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct NsSet(pub Vec<NamespaceId>);

impl Encode for NsSet {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_var_u32(w, self.0.len() as u32)?;
        for ns in &self.0 {
            ns.encode(w)?;
        }
        Ok(())
    }
}

impl Decode for NsSet {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.read_var_u32()?;
        let mut namespaces = Vec::new();
        for _ in 0..count {
            namespaces.push(NamespaceId::decode(r)?);
        }
        Ok(Self(namespaces))
    }
}

/// An AVM2 name, possibly qualified by a namespace or namespace set, and
/// possibly resolved at runtime (`RT` shapes pull the qualifier, and `L`
/// shapes additionally the name, off the operand stack).
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum Multiname {
    QName { ns: NamespaceId, name: StringId },
    QNameA { ns: NamespaceId, name: StringId },
    RTQName { name: StringId },
    RTQNameA { name: StringId },
    RTQNameL,
    RTQNameLA,
    Multiname { name: StringId, ns_set: NsSetId },
    MultinameA { name: StringId, ns_set: NsSetId },
    MultinameL { ns_set: NsSetId },
    MultinameLA { ns_set: NsSetId },
    /// A parameterized type such as `Vector.<int>`. Both the base name and
    /// the parameters are indices back into the multiname pool.
    TypeName {
        name: MultinameId,
        params: Vec<MultinameId>,
    },
}

impl Multiname {
    /// The reserved entry at index 0: the "any" name.
    pub const ANY: Self = Self::QName {
        ns: NamespaceId::ZERO,
        name: StringId::ZERO,
    };

    /// The wire tag for this shape.
    #[must_use]
    pub fn kind(&self) -> u8 {
        match self {
            Self::QName { .. } => KIND_QNAME,
            Self::QNameA { .. } => KIND_QNAME_A,
            Self::RTQName { .. } => KIND_RTQNAME,
            Self::RTQNameA { .. } => KIND_RTQNAME_A,
            Self::RTQNameL => KIND_RTQNAME_L,
            Self::RTQNameLA => KIND_RTQNAME_LA,
            Self::Multiname { .. } => KIND_MULTINAME,
            Self::MultinameA { .. } => KIND_MULTINAME_A,
            Self::MultinameL { .. } => KIND_MULTINAME_L,
            Self::MultinameLA { .. } => KIND_MULTINAME_LA,
            Self::TypeName { .. } => KIND_TYPENAME,
        }
    }
}

impl Encode for Multiname {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_u8(w, self.kind())?;
        match self {
            Self::QName { ns, name } | Self::QNameA { ns, name } => {
                ns.encode(w)?;
                name.encode(w)
            }
            Self::RTQName { name } | Self::RTQNameA { name } => name.encode(w),
            Self::RTQNameL | Self::RTQNameLA => Ok(()),
            Self::Multiname { name, ns_set } | Self::MultinameA { name, ns_set } => {
                name.encode(w)?;
                ns_set.encode(w)
            }
            Self::MultinameL { ns_set } | Self::MultinameLA { ns_set } => ns_set.encode(w),
            Self::TypeName { name, params } => {
                name.encode(w)?;
                io::write_var_u32(w, params.len() as u32)?;
                for param in params {
                    param.encode(w)?;
                }
                Ok(())
            }
        }
    }
}

impl Decode for Multiname {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let kind = r.read_u8()?;
        Ok(match kind {
            KIND_QNAME | KIND_QNAME_A => {
                let ns = NamespaceId::decode(r)?;
                let name = StringId::decode(r)?;
                if kind == KIND_QNAME {
                    Self::QName { ns, name }
                } else {
                    Self::QNameA { ns, name }
                }
            }
            KIND_RTQNAME => Self::RTQName {
                name: StringId::decode(r)?,
            },
            KIND_RTQNAME_A => Self::RTQNameA {
                name: StringId::decode(r)?,
            },
            KIND_RTQNAME_L => Self::RTQNameL,
            KIND_RTQNAME_LA => Self::RTQNameLA,
            KIND_MULTINAME | KIND_MULTINAME_A => {
                let name = StringId::decode(r)?;
                let ns_set = NsSetId::decode(r)?;
                if kind == KIND_MULTINAME {
                    Self::Multiname { name, ns_set }
                } else {
                    Self::MultinameA { name, ns_set }
                }
            }
            KIND_MULTINAME_L => Self::MultinameL {
                ns_set: NsSetId::decode(r)?,
            },
            KIND_MULTINAME_LA => Self::MultinameLA {
                ns_set: NsSetId::decode(r)?,
            },
            KIND_TYPENAME => {
                let name = MultinameId::decode(r)?;
                let count = r.read_var_u32()?;
                let mut params = Vec::new();
                for _ in 0..count {
                    params.push(MultinameId::decode(r)?);
                }
                Self::TypeName { name, params }
            }
            _ => return Err(r.err(DecodeErrorKind::BadMultiname(kind))),
        })
    }
}

/// The seven constant pools of an ABC block.
///
/// Index 0 of every pool is a reserved sentinel installed at construction:
/// zero for the value pools, the empty string, the "any" namespace, the
/// absent namespace set, and the "any" multiname. On the wire each pool is a
/// `var_u32` count followed by `count - 1` entries (a count of zero also
/// means "sentinel only").
#[derive(Debug, Clone)]
pub struct ConstantPool {
    pub ints: Vec<i32>,
    pub uints: Vec<u32>,
    pub doubles: Vec<f64>,
    pub strings: Vec<String>,
    pub namespaces: Vec<Namespace>,
    pub ns_sets: Vec<NsSet>,
    pub multinames: Vec<Multiname>,
    string_index: HashMap<String, StringId>,
    qname_index: HashMap<(StringId, NamespaceId), MultinameId>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        let mut string_index = HashMap::new();
        string_index.insert(String::new(), StringId::ZERO);
        let mut qname_index = HashMap::new();
        qname_index.insert((StringId::ZERO, NamespaceId::ZERO), MultinameId::ZERO);
        Self {
            ints: vec![0],
            uints: vec![0],
            doubles: vec![0.0],
            strings: vec![String::new()],
            namespaces: vec![Namespace::ANY],
            ns_sets: vec![NsSet::default()],
            multinames: vec![Multiname::ANY],
            string_index,
            qname_index,
        }
    }
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        // The intern maps are derived from the pools and irrelevant to
        // structural equality.
        self.ints == other.ints
            && self.uints == other.uints
            && self.doubles == other.doubles
            && self.strings == other.strings
            && self.namespaces == other.namespaces
            && self.ns_sets == other.ns_sets
            && self.multinames == other.multinames
    }
}

/// Number of wire entries in a pool with the given count field.
fn entries(count: u32) -> u32 {
    count.saturating_sub(1)
}

impl Decode for ConstantPool {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut pool = Self::default();

        for _ in 0..entries(r.read_var_u32()?) {
            pool.ints.push(r.read_var_i32()?);
        }
        for _ in 0..entries(r.read_var_u32()?) {
            pool.uints.push(r.read_var_u32()?);
        }
        for _ in 0..entries(r.read_var_u32()?) {
            pool.doubles.push(r.read_f64()?);
        }
        for _ in 0..entries(r.read_var_u32()?) {
            let s = r.read_str()?;
            let id = StringId::from(pool.strings.len() as u32);
            pool.string_index.entry(s.clone()).or_insert(id);
            pool.strings.push(s);
        }
        for _ in 0..entries(r.read_var_u32()?) {
            pool.namespaces.push(Namespace::decode(r)?);
        }
        for _ in 0..entries(r.read_var_u32()?) {
            pool.ns_sets.push(NsSet::decode(r)?);
        }
        for _ in 0..entries(r.read_var_u32()?) {
            let multiname = Multiname::decode(r)?;
            let id = MultinameId::from(pool.multinames.len() as u32);
            if let Multiname::QName { ns, name } = multiname {
                pool.qname_index.entry((name, ns)).or_insert(id);
            }
            pool.multinames.push(multiname);
        }

        Ok(pool)
    }
}

impl Encode for ConstantPool {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_var_u32(w, self.ints.len() as u32)?;
        for &value in &self.ints[1..] {
            io::write_var_i32(w, value)?;
        }
        io::write_var_u32(w, self.uints.len() as u32)?;
        for &value in &self.uints[1..] {
            io::write_var_u32(w, value)?;
        }
        io::write_var_u32(w, self.doubles.len() as u32)?;
        for &value in &self.doubles[1..] {
            io::write_f64(w, value)?;
        }
        io::write_var_u32(w, self.strings.len() as u32)?;
        for s in &self.strings[1..] {
            io::write_str(w, s)?;
        }
        io::write_var_u32(w, self.namespaces.len() as u32)?;
        for ns in &self.namespaces[1..] {
            ns.encode(w)?;
        }
        io::write_var_u32(w, self.ns_sets.len() as u32)?;
        for set in &self.ns_sets[1..] {
            set.encode(w)?;
        }
        io::write_var_u32(w, self.multinames.len() as u32)?;
        for multiname in &self.multinames[1..] {
            multiname.encode(w)?;
        }
        Ok(())
    }
}

impl ConstantPool {
    /// Returns the index of `s`, appending it to the string pool if absent.
    pub fn ensure_string(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.string_index.get(s) {
            return id;
        }
        let id = StringId::from(self.strings.len() as u32);
        self.strings.push(s.to_owned());
        self.string_index.insert(s.to_owned(), id);
        id
    }

    /// Returns the first namespace named `name`, interning a regular
    /// (kind 0x08) namespace if none exists.
    pub fn ensure_namespace(&mut self, name: &str) -> NamespaceId {
        let name = self.ensure_string(name);
        for (index, ns) in self.namespaces.iter().enumerate() {
            if ns.name == name {
                return NamespaceId::from(index as u32);
            }
        }
        let id = NamespaceId::from(self.namespaces.len() as u32);
        self.namespaces.push(Namespace {
            kind: Namespace::KIND_NAMESPACE,
            name,
        });
        id
    }

    /// Returns the interned `QName` for the `(name, ns)` pair, appending one
    /// if absent.
    pub fn ensure_multiname(&mut self, name: StringId, ns: NamespaceId) -> MultinameId {
        if let Some(&id) = self.qname_index.get(&(name, ns)) {
            return id;
        }
        let id = MultinameId::from(self.multinames.len() as u32);
        self.multinames.push(Multiname::QName { ns, name });
        self.qname_index.insert((name, ns), id);
        id
    }

    /// Looks up the `QName` whose name is `prop_name` and whose namespace is
    /// named `namespace`. Returns `None` when either string is not pooled or
    /// no such entry exists.
    #[must_use]
    pub fn find_multiname(&self, prop_name: &str, namespace: &str) -> Option<MultinameId> {
        let prop = *self.string_index.get(prop_name)?;
        let ns_name = *self.string_index.get(namespace)?;
        for (index, multiname) in self.multinames.iter().enumerate() {
            if let Multiname::QName { ns, name } = multiname {
                if *name == prop && self.namespaces.get(ns.index())?.name == ns_name {
                    return Some(MultinameId::from(index as u32));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        let pool = ConstantPool::default();
        assert_eq!(pool.ints, [0]);
        assert_eq!(pool.uints, [0]);
        assert_eq!(pool.doubles, [0.0]);
        assert_eq!(pool.strings, [""]);
        assert_eq!(pool.namespaces, [Namespace::ANY]);
        assert_eq!(pool.ns_sets, [NsSet::default()]);
        assert_eq!(pool.multinames, [Multiname::ANY]);
    }

    #[test]
    fn zero_counts_decode_as_sentinel_only() {
        let mut r = Reader::new(&[0, 0, 0, 0, 0, 0, 0]);
        let pool = ConstantPool::decode(&mut r).unwrap();
        assert_eq!(pool, ConstantPool::default());
        assert!(r.is_empty());
    }

    #[test]
    fn typename_decode() {
        let mut r = Reader::new(&[0x1D, 0x02, 0x01, 0x03]);
        let multiname = Multiname::decode(&mut r).unwrap();
        assert_eq!(
            multiname,
            Multiname::TypeName {
                name: MultinameId::from(2),
                params: vec![MultinameId::from(3)],
            }
        );

        let mut out = Vec::new();
        multiname.encode(&mut out).unwrap();
        assert_eq!(out, [0x1D, 0x02, 0x01, 0x03]);
    }

    #[test]
    fn unknown_multiname_kind() {
        let err = Multiname::decode(&mut Reader::new(&[0x05])).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::BadMultiname(0x05)));
    }

    #[test]
    fn ensure_string_interns() {
        let mut pool = ConstantPool::default();
        assert_eq!(pool.ensure_string(""), StringId::ZERO);
        let hello = pool.ensure_string("hello");
        assert_eq!(hello, StringId::from(1));
        assert_eq!(pool.ensure_string("hello"), hello);
        assert_eq!(pool.strings.len(), 2);
    }

    #[test]
    fn ensure_namespace_matches_by_name() {
        let mut pool = ConstantPool::default();
        // The sentinel namespace is named by the empty string.
        assert_eq!(pool.ensure_namespace(""), NamespaceId::ZERO);
        let ns = pool.ensure_namespace("flash.utils");
        assert_eq!(pool.namespaces[ns.index()].kind, Namespace::KIND_NAMESPACE);
        assert_eq!(pool.ensure_namespace("flash.utils"), ns);
    }

    #[test]
    fn ensure_and_find_multiname() {
        let mut pool = ConstantPool::default();
        let ns = pool.ensure_namespace("flash.display");
        let name = pool.ensure_string("Sprite");
        let id = pool.ensure_multiname(name, ns);
        assert_eq!(pool.ensure_multiname(name, ns), id);
        assert_eq!(pool.find_multiname("Sprite", "flash.display"), Some(id));
        assert_eq!(pool.find_multiname("Sprite", "flash.geom"), None);
        assert_eq!(pool.find_multiname("MovieClip", "flash.display"), None);
        // The sentinel pair is pre-interned at index 0.
        assert_eq!(
            pool.ensure_multiname(StringId::ZERO, NamespaceId::ZERO),
            MultinameId::ZERO
        );
    }
}
