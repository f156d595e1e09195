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

use abcbin::indices::{ClassId, MethodId, MultinameId, NamespaceId, NsSetId};
use abcbin::instructions::{Instruction, InstructionStream, Op, Operand};
use abcbin::pool::{Multiname, NsSet};
use abcbin::swf::Tag;
use abcbin::types::{
    ClassInfo, ExceptionEntry, InstanceInfo, Metadata, MethodBody, MethodInfo, OptionalValue,
    ScriptInfo, SlotTrait, SlotValue, Trait, TraitBody, ATTR_METADATA, HAS_OPTIONAL,
    PROTECTED_NAMESPACE,
};
use abcbin::{AbcFile, Swf, WriteOptions};
use anyhow::Result;
use indexmap::IndexMap;

const KEEP_METADATA: WriteOptions = WriteOptions {
    keep_metadata: true,
};

fn bare(op: Op) -> Instruction {
    Instruction {
        op,
        address: 0,
        args: Vec::new(),
        targets: Vec::new(),
    }
}

fn with_args(op: Op, args: Vec<Operand>) -> Instruction {
    Instruction {
        op,
        address: 0,
        args,
        targets: Vec::new(),
    }
}

/// Builds a unit exercising every table: pooled values of each kind, a
/// parameterized type, optional parameters, metadata, a class with slot and
/// method traits, a script exporting the class, and a body with real code
/// and an exception handler.
fn build_unit() -> Result<AbcFile> {
    let mut abc = AbcFile::new("frame1", 1);

    abc.constant_pool.ints.extend([42, -7]);
    abc.constant_pool.uints.push(0xDEAD_BEEF);
    abc.constant_pool.doubles.push(2.5);

    let ns = abc.ensure_namespace("flash.display");
    let object = abc.ensure_string("Object");
    let sprite = abc.ensure_string("Sprite");
    let vector = abc.ensure_string("Vector");
    let qname_object = abc.ensure_multiname(object, ns);
    let qname_sprite = abc.ensure_multiname(sprite, ns);
    let qname_vector = abc.ensure_multiname(vector, ns);

    abc.constant_pool
        .ns_sets
        .push(NsSet(vec![NamespaceId::ZERO, ns]));
    let ns_set = NsSetId::from(1);
    abc.constant_pool.multinames.push(Multiname::Multiname {
        name: sprite,
        ns_set,
    });
    abc.constant_pool.multinames.push(Multiname::TypeName {
        name: qname_vector,
        params: vec![qname_object],
    });

    let ctor = abc.ensure_string("Sprite/instance initializer");
    abc.methods.push(MethodInfo {
        name: ctor,
        flags: 0,
        params: Vec::new(),
        return_type: MultinameId::ZERO,
        optional_params: Vec::new(),
    });
    abc.methods.push(MethodInfo::default());
    let script_init = abc.ensure_string("script0$init");
    abc.methods.push(MethodInfo {
        name: script_init,
        flags: HAS_OPTIONAL,
        params: vec![qname_object],
        return_type: qname_object,
        optional_params: vec![OptionalValue {
            value: 1,
            kind: 0x03,
        }],
    });

    let embed = abc.ensure_string("Embed");
    let source = abc.ensure_string("source");
    let logo = abc.ensure_string("logo.png");
    abc.metadata.push(Metadata {
        name: embed,
        entries: IndexMap::from([(source, logo)]),
    });

    let graphics = abc.ensure_string("graphics");
    let qname_graphics = abc.ensure_multiname(graphics, ns);
    abc.instances.push(InstanceInfo {
        name: qname_sprite,
        super_name: qname_object,
        flags: PROTECTED_NAMESPACE,
        protected_ns: Some(ns),
        interfaces: Vec::new(),
        iinit: MethodId::from(0),
        traits: vec![
            Trait {
                name: qname_graphics,
                attributes: 0,
                body: TraitBody::Slot(SlotTrait {
                    slot_id: 1,
                    type_name: qname_object,
                    value: Some(SlotValue {
                        index: 1,
                        kind: 0x03,
                    }),
                }),
                metadata: Vec::new(),
            },
            Trait {
                name: qname_object,
                attributes: ATTR_METADATA,
                body: TraitBody::Method {
                    disp_id: 0,
                    method: MethodId::from(1),
                },
                metadata: vec![0u32.into()],
            },
        ],
    });
    abc.classes.push(ClassInfo {
        cinit: MethodId::from(1),
        traits: Vec::new(),
    });

    abc.scripts.push(ScriptInfo {
        init: MethodId::from(2),
        traits: vec![Trait {
            name: qname_sprite,
            attributes: 0,
            body: TraitBody::Class {
                slot_id: 1,
                class: ClassId::from(0),
            },
            metadata: Vec::new(),
        }],
    });

    let code = InstructionStream {
        instructions: vec![
            bare(Op::GetLocal0),
            bare(Op::PushScope),
            with_args(Op::ConstructSuper, vec![Operand::U30(0)]),
            with_args(Op::GetLex, vec![Operand::U30(u32::from(qname_object))]),
            bare(Op::Pop),
            bare(Op::ReturnVoid),
        ],
    }
    .assemble()?;
    abc.bodies.push(MethodBody {
        method: MethodId::from(0),
        max_stack: 2,
        local_count: 1,
        init_scope_depth: 0,
        max_scope_depth: 1,
        code,
        exceptions: vec![ExceptionEntry {
            from: 0,
            to: 4,
            target: 5,
            exc_type: qname_object,
            var_name: MultinameId::ZERO,
        }],
        traits: Vec::new(),
    });

    abc.validate()?;
    Ok(abc)
}

#[test]
fn empty_unit_byte_round_trip() -> Result<()> {
    let body = [
        0x00, 0x00, 0x00, 0x00, // minor, major
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, // pool counts
        0x00, 0x00, 0x00, 0x00, 0x00, // methods..bodies
    ];
    let abc = AbcFile::read("", 0, &body)?;
    let mut expected = vec![0x00, 0x00, 0x00, 0x00, 0x00];
    expected.extend_from_slice(&body);
    assert_eq!(abc.write()?, expected);
    Ok(())
}

#[test]
fn synthetic_unit_structural_round_trip() -> Result<()> {
    let abc = build_unit()?;
    let bytes = abc.write_with(KEEP_METADATA)?;
    let reread = AbcFile::from_do_abc(&bytes)?;
    assert_eq!(reread, abc);
    assert_eq!(reread.write_with(KEEP_METADATA)?, bytes);
    Ok(())
}

#[test]
fn default_write_discards_metadata() -> Result<()> {
    let abc = build_unit()?;
    let reread = AbcFile::from_do_abc(&abc.write()?)?;
    assert!(reread.metadata.is_empty());
    let method_trait = &reread.instances[0].traits[1];
    assert_eq!(method_trait.attributes & ATTR_METADATA, 0);
    assert!(method_trait.metadata.is_empty());
    // Everything else survives.
    assert_eq!(reread.instances[0].name, abc.instances[0].name);
    assert_eq!(reread.bodies, abc.bodies);
    Ok(())
}

#[test]
fn decoded_body_code_reassembles_identically() -> Result<()> {
    let abc = build_unit()?;
    let reread = AbcFile::from_do_abc(&abc.write()?)?;
    for body in &reread.bodies {
        let stream = InstructionStream::disassemble(&body.code)?;
        assert_eq!(stream.assemble()?, body.code);
    }
    Ok(())
}

#[test]
fn interning_survives_a_round_trip() -> Result<()> {
    let abc = build_unit()?;
    let mut reread = AbcFile::from_do_abc(&abc.write()?)?;
    let found = reread.find_multiname("Sprite", "flash.display");
    assert!(found.is_some());
    // Re-interning existing entries must not grow the pools.
    let strings = reread.constant_pool.strings.len();
    let multinames = reread.constant_pool.multinames.len();
    let sprite = reread.ensure_string("Sprite");
    let ns = reread.ensure_namespace("flash.display");
    assert_eq!(Some(reread.ensure_multiname(sprite, ns)), found);
    assert_eq!(reread.constant_pool.strings.len(), strings);
    assert_eq!(reread.constant_pool.multinames.len(), multinames);
    Ok(())
}

#[test]
fn container_round_trip_with_abc() -> Result<()> {
    let swf = Swf {
        version: 10,
        frame_size: vec![0x00],
        frame_rate: 0x1800,
        frame_count: 1,
        tags: vec![Tag::DoAbc(build_unit()?)],
        compressed: false,
    };
    let bytes = swf.write_with(KEEP_METADATA)?;
    let parsed = Swf::parse(&bytes)?;
    assert_eq!(parsed, swf);
    assert_eq!(parsed.abc_units().count(), 1);
    assert_eq!(parsed.write_with(KEEP_METADATA)?, bytes);
    Ok(())
}

#[test]
fn compressed_container_round_trip_with_abc() -> Result<()> {
    let swf = Swf {
        version: 10,
        frame_size: vec![0x00],
        frame_rate: 0x1800,
        frame_count: 1,
        tags: vec![Tag::DoAbc(build_unit()?)],
        compressed: true,
    };
    let bytes = swf.write_with(KEEP_METADATA)?;
    assert_eq!(&bytes[..3], b"CWS");
    assert_eq!(Swf::parse(&bytes)?, swf);
    Ok(())
}
