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

use std::fs;
use std::path::PathBuf;

use abcbin::instructions::InstructionStream;
use abcbin::Swf;
use anyhow::{Context, Result};
use log::LevelFilter;
use structopt::StructOpt;

/// Dump the ABC blocks embedded in an SWF file.
#[derive(Debug, StructOpt)]
struct Opt {
    /// The SWF file to inspect
    input: PathBuf,
    /// Disassemble every method body
    #[structopt(short, long)]
    disassemble: bool,
    /// Re-emit the decoded container to this path
    #[structopt(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .format_target(false)
        .filter_level(LevelFilter::Info)
        .parse_env(env_logger::Env::default())
        .init();

    let opt = Opt::from_args();

    let raw = fs::read(&opt.input)
        .with_context(|| format!("Reading {}", opt.input.display()))?;
    let swf = Swf::parse(&raw).context("Parsing SWF container")?;

    for abc in swf.abc_units() {
        let pool = &abc.constant_pool;
        println!(
            "{}: ints={} uints={} doubles={} strings={} namespaces={} ns_sets={} \
             multinames={} methods={} metadata={} instances={} classes={} scripts={} bodies={}",
            if abc.name.is_empty() {
                "<unnamed>"
            } else {
                &abc.name
            },
            pool.ints.len(),
            pool.uints.len(),
            pool.doubles.len(),
            pool.strings.len(),
            pool.namespaces.len(),
            pool.ns_sets.len(),
            pool.multinames.len(),
            abc.methods.len(),
            abc.metadata.len(),
            abc.instances.len(),
            abc.classes.len(),
            abc.scripts.len(),
            abc.bodies.len(),
        );

        if opt.disassemble {
            for body in &abc.bodies {
                println!("  method #{}:", u32::from(body.method));
                let stream = InstructionStream::disassemble(&body.code)
                    .with_context(|| format!("Disassembling method #{}", u32::from(body.method)))?;
                for instruction in &stream.instructions {
                    println!("    {instruction}");
                }
            }
        }
    }

    if let Some(output) = opt.output {
        fs::write(&output, swf.write()?)
            .with_context(|| format!("Writing {}", output.display()))?;
        log::info!("Wrote {}", output.display());
    }

    Ok(())
}
