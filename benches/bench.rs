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

use abcbin::instructions::InstructionStream;
use abcbin::AbcFile;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

/// Synthesizes a unit with a few hundred pooled names and method bodies.
fn build_fixture() -> Vec<u8> {
    use abcbin::indices::MethodId;
    use abcbin::types::{MethodBody, MethodInfo};

    let mut abc = AbcFile::new("bench", 1);
    let ns = abc.ensure_namespace("bench.fixture");
    for i in 0..512 {
        let name = abc.ensure_string(&format!("symbol{i}"));
        abc.ensure_multiname(name, ns);
    }
    for i in 0..128u32 {
        let name = abc.ensure_string(&format!("method{i}"));
        abc.methods.push(MethodInfo {
            name,
            ..MethodInfo::default()
        });
        abc.bodies.push(MethodBody {
            method: MethodId::from(i),
            max_stack: 2,
            local_count: 1,
            init_scope_depth: 0,
            max_scope_depth: 1,
            // getlocal0; pushscope; returnvoid
            code: vec![0xD0, 0x30, 0x47],
            exceptions: Vec::new(),
            traits: Vec::new(),
        });
    }
    abc.write().unwrap()
}

fn bench(c: &mut Criterion) {
    let bytes = build_fixture();
    c.bench_function("decode", |b| {
        b.iter(|| AbcFile::from_do_abc(black_box(&bytes)).unwrap());
    });

    let abc = AbcFile::from_do_abc(&bytes).unwrap();
    c.bench_function("encode", |b| b.iter(|| abc.write().unwrap()));

    c.bench_function("disassemble", |b| {
        b.iter(|| {
            for body in &abc.bodies {
                InstructionStream::disassemble(black_box(&body.code)).unwrap();
            }
        });
    });
}

criterion_group!(benches, bench);
criterion_main!(benches);
