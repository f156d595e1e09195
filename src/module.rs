//! The ABC unit: a fully decoded `DoABC` block and its pools.

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

use crate::indices::{MultinameId, NamespaceId, StringId};
use crate::io::{self, Decode, DecodeError, DecodeErrorKind, Encode, Reader};
use crate::pool::{ConstantPool, Multiname};
use crate::types::{
    ClassInfo, InstanceInfo, Metadata, MethodBody, MethodInfo, ScriptInfo, Trait, TraitBody,
};
use thiserror::Error;

/// Encoder knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Re-emit the unit-level metadata table and trait metadata attachments.
    ///
    /// The reference writer discards both, emitting an empty metadata table
    /// and clearing the metadata attribute on every trait; `false` (the
    /// default) reproduces that. Set to `true` for a structurally lossless
    /// round-trip.
    pub keep_metadata: bool,
}

#[derive(Debug, Error)]
#[error("instance and class tables must be the same length")]
struct ClassTableMismatch;

impl From<ClassTableMismatch> for std::io::Error {
    fn from(err: ClassTableMismatch) -> Self {
        Self::new(std::io::ErrorKind::InvalidData, err)
    }
}

/// One decoded ABC block.
///
/// The unit owns every pool; entities reference each other exclusively
/// through typed indices (see [`crate::indices`]). `name` and `flags` come
/// from the enclosing `DoABC` tag header rather than the ABC body itself.
#[derive(Debug, PartialEq, Clone)]
pub struct AbcFile {
    pub name: String,
    pub flags: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub methods: Vec<MethodInfo>,
    pub metadata: Vec<Metadata>,
    pub instances: Vec<InstanceInfo>,
    pub classes: Vec<ClassInfo>,
    pub scripts: Vec<ScriptInfo>,
    pub bodies: Vec<MethodBody>,
}

impl AbcFile {
    /// Creates an empty unit: sentinel-only pools, no tables, current AVM2
    /// version numbers.
    #[must_use]
    pub fn new(name: impl Into<String>, flags: u32) -> Self {
        Self {
            name: name.into(),
            flags,
            minor_version: 16,
            major_version: 46,
            constant_pool: ConstantPool::default(),
            methods: Vec::new(),
            metadata: Vec::new(),
            instances: Vec::new(),
            classes: Vec::new(),
            scripts: Vec::new(),
            bodies: Vec::new(),
        }
    }

    /// Decodes an ABC body (version word onward). `name` and `flags` are the
    /// values the enclosing `DoABC` tag carried.
    ///
    /// The decoded unit is checked for dangling indices before being
    /// returned, so every stored index can be used to slice its pool.
    pub fn read(name: impl Into<String>, flags: u32, data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);

        let minor_version = r.read_u16()?;
        let major_version = r.read_u16()?;
        let constant_pool = ConstantPool::decode(&mut r)?;

        let method_count = r.read_var_u32()?;
        let mut methods = Vec::new();
        for _ in 0..method_count {
            methods.push(MethodInfo::decode(&mut r)?);
        }

        let metadata_count = r.read_var_u32()?;
        let mut metadata = Vec::new();
        for _ in 0..metadata_count {
            metadata.push(Metadata::decode(&mut r)?);
        }

        let class_count = r.read_var_u32()?;
        let mut instances = Vec::new();
        for _ in 0..class_count {
            instances.push(InstanceInfo::decode(&mut r)?);
        }
        let mut classes = Vec::new();
        for _ in 0..class_count {
            classes.push(ClassInfo::decode(&mut r)?);
        }

        let script_count = r.read_var_u32()?;
        let mut scripts = Vec::new();
        for _ in 0..script_count {
            scripts.push(ScriptInfo::decode(&mut r)?);
        }

        let body_count = r.read_var_u32()?;
        let mut bodies = Vec::new();
        for _ in 0..body_count {
            bodies.push(MethodBody::decode(&mut r)?);
        }

        let abc = Self {
            name: name.into(),
            flags,
            minor_version,
            major_version,
            constant_pool,
            methods,
            metadata,
            instances,
            classes,
            scripts,
            bodies,
        };
        abc.validate()?;
        Ok(abc)
    }

    /// Decodes a whole `DoABC` tag body: `u32` flags, NUL-terminated name,
    /// then the ABC bytes.
    pub fn from_do_abc(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let flags = r.read_u32()?;
        let name = r.read_cstr()?;
        let body = r.read_bytes(r.remaining())?;
        Self::read(name, flags, body)
    }

    /// Serializes the unit back to a `DoABC` tag body with default options.
    pub fn write(&self) -> std::io::Result<Vec<u8>> {
        self.write_with(WriteOptions::default())
    }

    /// Serializes the unit back to a `DoABC` tag body: `u32` flags,
    /// NUL-terminated name, version word, then every table in wire order.
    pub fn write_with(&self, options: WriteOptions) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out, options)?;
        Ok(out)
    }

    pub fn encode_into(
        &self,
        w: &mut impl std::io::Write,
        options: WriteOptions,
    ) -> std::io::Result<()> {
        if self.instances.len() != self.classes.len() {
            return Err(ClassTableMismatch.into());
        }

        io::write_u32(w, self.flags)?;
        io::write_cstr(w, &self.name)?;
        io::write_u16(w, self.minor_version)?;
        io::write_u16(w, self.major_version)?;
        self.constant_pool.encode(w)?;

        io::write_var_u32(w, self.methods.len() as u32)?;
        for method in &self.methods {
            method.encode(w)?;
        }

        if options.keep_metadata {
            io::write_var_u32(w, self.metadata.len() as u32)?;
            for metadata in &self.metadata {
                metadata.encode(w)?;
            }
        } else {
            io::write_var_u32(w, 0)?;
        }

        io::write_var_u32(w, self.instances.len() as u32)?;
        for instance in &self.instances {
            instance.encode_with(w, options.keep_metadata)?;
        }
        for class in &self.classes {
            class.encode_with(w, options.keep_metadata)?;
        }

        io::write_var_u32(w, self.scripts.len() as u32)?;
        for script in &self.scripts {
            script.encode_with(w, options.keep_metadata)?;
        }

        io::write_var_u32(w, self.bodies.len() as u32)?;
        for body in &self.bodies {
            body.encode_with(w, options.keep_metadata)?;
        }
        Ok(())
    }

    /// Checks that every stored index lands inside its pool.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let pool = &self.constant_pool;
        let strings = pool.strings.len();
        let namespaces = pool.namespaces.len();
        let ns_sets = pool.ns_sets.len();
        let multinames = pool.multinames.len();

        for ns in &pool.namespaces {
            check("string", ns.name.index, strings)?;
        }
        for set in &pool.ns_sets {
            for ns in &set.0 {
                check("namespace", ns.index, namespaces)?;
            }
        }
        for multiname in &pool.multinames {
            match multiname {
                Multiname::QName { ns, name } | Multiname::QNameA { ns, name } => {
                    check("namespace", ns.index, namespaces)?;
                    check("string", name.index, strings)?;
                }
                Multiname::RTQName { name } | Multiname::RTQNameA { name } => {
                    check("string", name.index, strings)?;
                }
                Multiname::RTQNameL | Multiname::RTQNameLA => {}
                Multiname::Multiname { name, ns_set }
                | Multiname::MultinameA { name, ns_set } => {
                    check("string", name.index, strings)?;
                    check("ns_set", ns_set.index, ns_sets)?;
                }
                Multiname::MultinameL { ns_set } | Multiname::MultinameLA { ns_set } => {
                    check("ns_set", ns_set.index, ns_sets)?;
                }
                Multiname::TypeName { name, params } => {
                    check("multiname", name.index, multinames)?;
                    for param in params {
                        check("multiname", param.index, multinames)?;
                    }
                }
            }
        }

        for method in &self.methods {
            check("string", method.name.index, strings)?;
            check("multiname", method.return_type.index, multinames)?;
            for param in &method.params {
                check("multiname", param.index, multinames)?;
            }
        }

        for metadata in &self.metadata {
            check("string", metadata.name.index, strings)?;
            for (key, value) in &metadata.entries {
                check("string", key.index, strings)?;
                check("string", value.index, strings)?;
            }
        }

        for instance in &self.instances {
            check("multiname", instance.name.index, multinames)?;
            check("multiname", instance.super_name.index, multinames)?;
            if let Some(ns) = instance.protected_ns {
                check("namespace", ns.index, namespaces)?;
            }
            for interface in &instance.interfaces {
                check("multiname", interface.index, multinames)?;
            }
            check("method", instance.iinit.index, self.methods.len())?;
            self.validate_traits(&instance.traits)?;
        }
        for class in &self.classes {
            check("method", class.cinit.index, self.methods.len())?;
            self.validate_traits(&class.traits)?;
        }
        for script in &self.scripts {
            check("method", script.init.index, self.methods.len())?;
            self.validate_traits(&script.traits)?;
        }
        for body in &self.bodies {
            check("method", body.method.index, self.methods.len())?;
            for exception in &body.exceptions {
                check("multiname", exception.exc_type.index, multinames)?;
                check("multiname", exception.var_name.index, multinames)?;
            }
            self.validate_traits(&body.traits)?;
        }
        Ok(())
    }

    fn validate_traits(&self, traits: &[Trait]) -> Result<(), DecodeError> {
        let multinames = self.constant_pool.multinames.len();
        for t in traits {
            check("multiname", t.name.index, multinames)?;
            match &t.body {
                TraitBody::Slot(slot) | TraitBody::Const(slot) => {
                    check("multiname", slot.type_name.index, multinames)?;
                }
                TraitBody::Method { method, .. }
                | TraitBody::Getter { method, .. }
                | TraitBody::Setter { method, .. }
                | TraitBody::Function { method, .. } => {
                    check("method", method.index, self.methods.len())?;
                }
                TraitBody::Class { class, .. } => {
                    check("class", class.index, self.classes.len())?;
                }
            }
            for id in &t.metadata {
                check("metadata", id.index, self.metadata.len())?;
            }
        }
        Ok(())
    }

    /// Returns the index of `s` in the string pool, appending it if absent.
    pub fn ensure_string(&mut self, s: &str) -> StringId {
        self.constant_pool.ensure_string(s)
    }

    /// Returns the first namespace named `name`, interning a regular
    /// (kind 0x08) namespace if none exists.
    pub fn ensure_namespace(&mut self, name: &str) -> NamespaceId {
        self.constant_pool.ensure_namespace(name)
    }

    /// Returns the interned `QName` for `(name, ns)`, appending one if
    /// absent.
    pub fn ensure_multiname(&mut self, name: StringId, ns: NamespaceId) -> MultinameId {
        self.constant_pool.ensure_multiname(name, ns)
    }

    /// Looks up the `QName` naming `prop_name` inside the namespace named
    /// `namespace`.
    #[must_use]
    pub fn find_multiname(&self, prop_name: &str, namespace: &str) -> Option<MultinameId> {
        self.constant_pool.find_multiname(prop_name, namespace)
    }
}

fn check(pool: &'static str, index: u32, len: usize) -> Result<(), DecodeError> {
    if (index as usize) < len {
        Ok(())
    } else {
        Err(DecodeErrorKind::IndexOutOfRange { pool, index, len }.into())
    }
}
