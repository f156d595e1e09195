//! Method, metadata, class, script, trait, and method-body tables.

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

use crate::indices::{ClassId, MetadataId, MethodId, MultinameId, NamespaceId, StringId};
use crate::io::{self, Decode, DecodeError, DecodeErrorKind, Encode, Reader};
use indexmap::IndexMap;
use std::fmt;

pub const NEED_REST: u8 = 0x04;
pub const HAS_OPTIONAL: u8 = 0x08;
pub const HAS_PARAM_NAMES: u8 = 0x80;

/// Set on an instance whose protected namespace follows the flags byte.
pub const PROTECTED_NAMESPACE: u8 = 0x08;

const TRAIT_SLOT: u8 = 0;
const TRAIT_METHOD: u8 = 1;
const TRAIT_GETTER: u8 = 2;
const TRAIT_SETTER: u8 = 3;
const TRAIT_CLASS: u8 = 4;
const TRAIT_FUNCTION: u8 = 5;
const TRAIT_CONST: u8 = 6;

/// Trait attribute nibble: the metadata bit gates the index list after the
/// trait payload.
pub const ATTR_FINAL: u8 = 0x01;
pub const ATTR_OVERRIDE: u8 = 0x02;
pub const ATTR_METADATA: u8 = 0x04;

/// A method signature.
///
/// Parameter names are not part of the model: the AVM2 never consults them,
/// so they are skipped on read, `HAS_PARAM_NAMES` is cleared, and the writer
/// never re-emits either.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct MethodInfo {
    pub name: StringId,
    pub flags: u8,
    pub params: Vec<MultinameId>,
    pub return_type: MultinameId,
    /// Default values for trailing parameters; present iff
    /// `flags & HAS_OPTIONAL`.
    pub optional_params: Vec<OptionalValue>,
}

/// A default parameter value: an index into the pool selected by `kind`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OptionalValue {
    pub value: u32,
    pub kind: u8,
}

impl Decode for MethodInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let param_count = r.read_var_u32()?;
        let return_type = MultinameId::decode(r)?;
        let mut params = Vec::new();
        for _ in 0..param_count {
            params.push(MultinameId::decode(r)?);
        }
        let name = StringId::decode(r)?;
        let mut flags = r.read_u8()?;

        let mut optional_params = Vec::new();
        if flags & HAS_OPTIONAL != 0 {
            let option_count = r.read_var_u32()?;
            for _ in 0..option_count {
                optional_params.push(OptionalValue {
                    value: r.read_var_u32()?,
                    kind: r.read_u8()?,
                });
            }
        }

        if flags & HAS_PARAM_NAMES != 0 {
            for _ in 0..param_count {
                r.read_var_u32()?;
            }
            flags &= !HAS_PARAM_NAMES;
        }

        Ok(Self {
            name,
            flags,
            params,
            return_type,
            optional_params,
        })
    }
}

impl Encode for MethodInfo {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_var_u32(w, self.params.len() as u32)?;
        self.return_type.encode(w)?;
        for param in &self.params {
            param.encode(w)?;
        }
        self.name.encode(w)?;
        io::write_u8(w, self.flags & !HAS_PARAM_NAMES)?;
        if self.flags & HAS_OPTIONAL != 0 {
            io::write_var_u32(w, self.optional_params.len() as u32)?;
            for option in &self.optional_params {
                io::write_var_u32(w, option.value)?;
                io::write_u8(w, option.kind)?;
            }
        }
        Ok(())
    }
}

/// A `[Metadata]` record: a name plus ordered key/value string pairs.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Metadata {
    pub name: StringId,
    pub entries: IndexMap<StringId, StringId>,
}

impl Decode for Metadata {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let name = StringId::decode(r)?;
        let item_count = r.read_var_u32()?;
        let mut entries = IndexMap::new();
        for _ in 0..item_count {
            let key = StringId::decode(r)?;
            let value = StringId::decode(r)?;
            // Duplicate keys: last writer wins.
            entries.insert(key, value);
        }
        Ok(Self { name, entries })
    }
}

impl Encode for Metadata {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        self.name.encode(w)?;
        io::write_var_u32(w, self.entries.len() as u32)?;
        for (key, value) in &self.entries {
            key.encode(w)?;
            value.encode(w)?;
        }
        Ok(())
    }
}

/// The instance side of a class: name, inheritance, and instance traits.
#[derive(Debug, PartialEq, Clone)]
pub struct InstanceInfo {
    pub name: MultinameId,
    pub super_name: MultinameId,
    pub flags: u8,
    pub protected_ns: Option<NamespaceId>,
    pub interfaces: Vec<MultinameId>,
    pub iinit: MethodId,
    pub traits: Vec<Trait>,
}

impl Decode for InstanceInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let name = MultinameId::decode(r)?;
        let super_name = MultinameId::decode(r)?;
        let flags = r.read_u8()?;
        let protected_ns = if flags & PROTECTED_NAMESPACE != 0 {
            Some(NamespaceId::decode(r)?)
        } else {
            None
        };
        let intf_count = r.read_var_u32()?;
        let mut interfaces = Vec::new();
        for _ in 0..intf_count {
            interfaces.push(MultinameId::decode(r)?);
        }
        let iinit = MethodId::decode(r)?;
        let traits = decode_traits(r)?;
        Ok(Self {
            name,
            super_name,
            flags,
            protected_ns,
            interfaces,
            iinit,
            traits,
        })
    }
}

impl InstanceInfo {
    pub(crate) fn encode_with(
        &self,
        w: &mut impl std::io::Write,
        keep_metadata: bool,
    ) -> std::io::Result<()> {
        self.name.encode(w)?;
        self.super_name.encode(w)?;
        // The option is authoritative over the flag bit.
        let mut flags = self.flags & !PROTECTED_NAMESPACE;
        if self.protected_ns.is_some() {
            flags |= PROTECTED_NAMESPACE;
        }
        io::write_u8(w, flags)?;
        if let Some(ns) = self.protected_ns {
            ns.encode(w)?;
        }
        io::write_var_u32(w, self.interfaces.len() as u32)?;
        for interface in &self.interfaces {
            interface.encode(w)?;
        }
        self.iinit.encode(w)?;
        encode_traits(w, &self.traits, keep_metadata)
    }
}

/// The static side of a class, parallel to [`InstanceInfo`].
#[derive(Debug, PartialEq, Clone)]
pub struct ClassInfo {
    pub cinit: MethodId,
    pub traits: Vec<Trait>,
}

impl Decode for ClassInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            cinit: MethodId::decode(r)?,
            traits: decode_traits(r)?,
        })
    }
}

impl ClassInfo {
    pub(crate) fn encode_with(
        &self,
        w: &mut impl std::io::Write,
        keep_metadata: bool,
    ) -> std::io::Result<()> {
        self.cinit.encode(w)?;
        encode_traits(w, &self.traits, keep_metadata)
    }
}

/// A script record: its initializer plus global traits.
#[derive(Debug, PartialEq, Clone)]
pub struct ScriptInfo {
    pub init: MethodId,
    pub traits: Vec<Trait>,
}

impl Decode for ScriptInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            init: MethodId::decode(r)?,
            traits: decode_traits(r)?,
        })
    }
}

impl ScriptInfo {
    pub(crate) fn encode_with(
        &self,
        w: &mut impl std::io::Write,
        keep_metadata: bool,
    ) -> std::io::Result<()> {
        self.init.encode(w)?;
        encode_traits(w, &self.traits, keep_metadata)
    }
}

/// A named slot on an instance, class, script, or method body.
#[derive(Debug, PartialEq, Clone)]
pub struct Trait {
    pub name: MultinameId,
    /// High nibble of the wire kind byte (`ATTR_*`).
    pub attributes: u8,
    pub body: TraitBody,
    pub metadata: Vec<MetadataId>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TraitBody {
    Slot(SlotTrait),
    Method { disp_id: u32, method: MethodId },
    Getter { disp_id: u32, method: MethodId },
    Setter { disp_id: u32, method: MethodId },
    Class { slot_id: u32, class: ClassId },
    Function { disp_id: u32, method: MethodId },
    Const(SlotTrait),
}

impl TraitBody {
    fn tag(&self) -> u8 {
        match self {
            Self::Slot(_) => TRAIT_SLOT,
            Self::Method { .. } => TRAIT_METHOD,
            Self::Getter { .. } => TRAIT_GETTER,
            Self::Setter { .. } => TRAIT_SETTER,
            Self::Class { .. } => TRAIT_CLASS,
            Self::Function { .. } => TRAIT_FUNCTION,
            Self::Const(_) => TRAIT_CONST,
        }
    }
}

/// Payload shared by `Slot` and `Const` traits.
#[derive(Debug, PartialEq, Clone)]
pub struct SlotTrait {
    pub slot_id: u32,
    pub type_name: MultinameId,
    /// Initial value; `None` on the wire is `vindex == 0`, and a present
    /// value is followed by its pool-selector kind byte.
    pub value: Option<SlotValue>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SlotValue {
    pub index: u32,
    pub kind: u8,
}

impl Decode for SlotTrait {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let slot_id = r.read_var_u32()?;
        let type_name = MultinameId::decode(r)?;
        let vindex = r.read_var_u32()?;
        let value = if vindex == 0 {
            None
        } else {
            Some(SlotValue {
                index: vindex,
                kind: r.read_u8()?,
            })
        };
        Ok(Self {
            slot_id,
            type_name,
            value,
        })
    }
}

impl Encode for SlotTrait {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_var_u32(w, self.slot_id)?;
        self.type_name.encode(w)?;
        match self.value {
            None => io::write_var_u32(w, 0),
            Some(value) => {
                io::write_var_u32(w, value.index)?;
                io::write_u8(w, value.kind)
            }
        }
    }
}

impl Decode for Trait {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let name = MultinameId::decode(r)?;
        let kind = r.read_u8()?;
        let attributes = kind >> 4;
        let body = match kind & 0x0F {
            TRAIT_SLOT => TraitBody::Slot(SlotTrait::decode(r)?),
            TRAIT_CONST => TraitBody::Const(SlotTrait::decode(r)?),
            TRAIT_METHOD => TraitBody::Method {
                disp_id: r.read_var_u32()?,
                method: MethodId::decode(r)?,
            },
            TRAIT_GETTER => TraitBody::Getter {
                disp_id: r.read_var_u32()?,
                method: MethodId::decode(r)?,
            },
            TRAIT_SETTER => TraitBody::Setter {
                disp_id: r.read_var_u32()?,
                method: MethodId::decode(r)?,
            },
            TRAIT_CLASS => TraitBody::Class {
                slot_id: r.read_var_u32()?,
                class: ClassId::decode(r)?,
            },
            TRAIT_FUNCTION => TraitBody::Function {
                disp_id: r.read_var_u32()?,
                method: MethodId::decode(r)?,
            },
            _ => return Err(r.err(DecodeErrorKind::BadTrait(kind))),
        };
        let mut metadata = Vec::new();
        if attributes & ATTR_METADATA != 0 {
            let meta_count = r.read_var_u32()?;
            for _ in 0..meta_count {
                metadata.push(MetadataId::decode(r)?);
            }
        }
        Ok(Self {
            name,
            attributes,
            body,
            metadata,
        })
    }
}

impl Trait {
    pub(crate) fn encode_with(
        &self,
        w: &mut impl std::io::Write,
        keep_metadata: bool,
    ) -> std::io::Result<()> {
        self.name.encode(w)?;
        let has_metadata = keep_metadata
            && (self.attributes & ATTR_METADATA != 0 || !self.metadata.is_empty());
        let mut attributes = self.attributes & !ATTR_METADATA;
        if has_metadata {
            attributes |= ATTR_METADATA;
        }
        io::write_u8(w, (attributes << 4) | self.body.tag())?;
        match &self.body {
            TraitBody::Slot(slot) | TraitBody::Const(slot) => slot.encode(w)?,
            TraitBody::Method { disp_id, method }
            | TraitBody::Getter { disp_id, method }
            | TraitBody::Setter { disp_id, method }
            | TraitBody::Function { disp_id, method } => {
                io::write_var_u32(w, *disp_id)?;
                method.encode(w)?;
            }
            TraitBody::Class { slot_id, class } => {
                io::write_var_u32(w, *slot_id)?;
                class.encode(w)?;
            }
        }
        if has_metadata {
            io::write_var_u32(w, self.metadata.len() as u32)?;
            for id in &self.metadata {
                id.encode(w)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn decode_traits(r: &mut Reader<'_>) -> Result<Vec<Trait>, DecodeError> {
    let trait_count = r.read_var_u32()?;
    let mut traits = Vec::new();
    for _ in 0..trait_count {
        traits.push(Trait::decode(r)?);
    }
    Ok(traits)
}

pub(crate) fn encode_traits(
    w: &mut impl std::io::Write,
    traits: &[Trait],
    keep_metadata: bool,
) -> std::io::Result<()> {
    io::write_var_u32(w, traits.len() as u32)?;
    for t in traits {
        t.encode_with(w, keep_metadata)?;
    }
    Ok(())
}

/// A method body: stack/scope sizing, the raw bytecode buffer, the exception
/// table, and body-local traits.
///
/// The `code` bytes stay opaque here; [`crate::instructions`] decodes them on
/// demand.
#[derive(custom_debug::Debug, PartialEq, Clone)]
pub struct MethodBody {
    pub method: MethodId,
    pub max_stack: u32,
    pub local_count: u32,
    pub init_scope_depth: u32,
    pub max_scope_depth: u32,
    #[debug(with = fmt_code)]
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionEntry>,
    pub traits: Vec<Trait>,
}

fn fmt_code<T: AsRef<[u8]>>(code: &T, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "[{} bytes]", code.as_ref().len())
}

/// One exception-table row: `from..to` guards `target`, all byte offsets
/// into the owning body's `code`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ExceptionEntry {
    pub from: u32,
    pub to: u32,
    pub target: u32,
    pub exc_type: MultinameId,
    pub var_name: MultinameId,
}

impl Decode for ExceptionEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            from: r.read_var_u32()?,
            to: r.read_var_u32()?,
            target: r.read_var_u32()?,
            exc_type: MultinameId::decode(r)?,
            var_name: MultinameId::decode(r)?,
        })
    }
}

impl Encode for ExceptionEntry {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_var_u32(w, self.from)?;
        io::write_var_u32(w, self.to)?;
        io::write_var_u32(w, self.target)?;
        self.exc_type.encode(w)?;
        self.var_name.encode(w)
    }
}

impl Decode for MethodBody {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let method = MethodId::decode(r)?;
        let max_stack = r.read_var_u32()?;
        let local_count = r.read_var_u32()?;
        let init_scope_depth = r.read_var_u32()?;
        let max_scope_depth = r.read_var_u32()?;
        let code_len = r.read_var_u32()? as usize;
        let code = r.read_bytes(code_len)?.to_vec();
        let ex_count = r.read_var_u32()?;
        let mut exceptions = Vec::new();
        for _ in 0..ex_count {
            exceptions.push(ExceptionEntry::decode(r)?);
        }
        let traits = decode_traits(r)?;
        Ok(Self {
            method,
            max_stack,
            local_count,
            init_scope_depth,
            max_scope_depth,
            code,
            exceptions,
            traits,
        })
    }
}

impl MethodBody {
    pub(crate) fn encode_with(
        &self,
        w: &mut impl std::io::Write,
        keep_metadata: bool,
    ) -> std::io::Result<()> {
        self.method.encode(w)?;
        io::write_var_u32(w, self.max_stack)?;
        io::write_var_u32(w, self.local_count)?;
        io::write_var_u32(w, self.init_scope_depth)?;
        io::write_var_u32(w, self.max_scope_depth)?;
        io::write_var_u32(w, self.code.len() as u32)?;
        w.write_all(&self.code)?;
        io::write_var_u32(w, self.exceptions.len() as u32)?;
        for exception in &self.exceptions {
            exception.encode(w)?;
        }
        encode_traits(w, &self.traits, keep_metadata)
    }
}
