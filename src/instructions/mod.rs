//! The AVM2 instruction set: opcode table, disassembler, and assembler.

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

use crate::io::{self, Decode, DecodeError, DecodeErrorKind, Encode, Reader};
use once_cell::sync::Lazy;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Operand encodings an opcode row may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    U8,
    U16,
    U32,
    /// Unsigned LEB128, guaranteed below `2^30` by the format.
    U30,
    /// Little-endian signed 24-bit branch displacement.
    S24,
    /// Signed LEB128 (32-bit).
    S32,
    /// The `lookupswitch` jump-table tail: a case count followed by
    /// `count + 1` signed 24-bit displacements.
    S24Arr,
}

/// One row of the opcode table.
#[derive(Debug, Clone, Copy)]
pub struct OpDesc {
    pub op: Op,
    pub mnemonic: &'static str,
    pub byte: u8,
    pub args: &'static [ArgKind],
}

macro_rules! ops {
    ($($mnemonic:literal $name:ident = $byte:literal $([$($kind:ident)*])?;)*) => {
        /// Every known AVM2 opcode, with the opcode byte as discriminant.
        ///
        /// Variant names are derived from the mnemonics; the mnemonics
        /// themselves (some of which collide with reserved words, like `in`
        /// and `not`) are available through [`Op::mnemonic`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($name = $byte,)*
        }

        /// The full opcode table in mnemonic order.
        pub static TABLE: &[OpDesc] = &[
            $(OpDesc {
                op: Op::$name,
                mnemonic: $mnemonic,
                byte: $byte,
                args: &[$($(ArgKind::$kind),*)?],
            },)*
        ];

        impl Op {
            #[must_use]
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Op::$name => $mnemonic,)*
                }
            }

            /// The operand kinds this opcode carries, in decode order.
            #[must_use]
            pub fn args(self) -> &'static [ArgKind] {
                match self {
                    $(Op::$name => &[$($(ArgKind::$kind),*)?],)*
                }
            }
        }
    };
}

ops! {
    "add" Add = 0xA0;
    "add_d" AddD = 0x9B;
    "add_i" AddI = 0xC5;
    "applytype" ApplyType = 0x53 [U30];
    "astype" AsType = 0x86 [U30];
    "astypelate" AsTypeLate = 0x87;
    "bitand" BitAnd = 0xA8;
    "bitnot" BitNot = 0x97;
    "bitor" BitOr = 0xA9;
    "bitxor" BitXor = 0xAA;
    "bkpt" Bkpt = 0x01;
    "bkptline" BkptLine = 0xF2 [U30];
    "call" Call = 0x41 [U30];
    "callinterface" CallInterface = 0x4D [U30 U30];
    "callmethod" CallMethod = 0x43 [U30 U30];
    "callproperty" CallProperty = 0x46 [U30 U30];
    "callproplex" CallPropLex = 0x4C [U30 U30];
    "callpropvoid" CallPropVoid = 0x4F [U30 U30];
    "callstatic" CallStatic = 0x44 [U30 U30];
    "callsuper" CallSuper = 0x45 [U30 U30];
    "callsuperid" CallSuperId = 0x4B;
    "callsupervoid" CallSuperVoid = 0x4E [U30 U30];
    "checkfilter" CheckFilter = 0x78;
    "coerce" Coerce = 0x80 [U30];
    "coerce_a" CoerceA = 0x82;
    "coerce_b" CoerceB = 0x81;
    "coerce_d" CoerceD = 0x84;
    "coerce_i" CoerceI = 0x83;
    "coerce_o" CoerceO = 0x89;
    "coerce_s" CoerceS = 0x85;
    "coerce_u" CoerceU = 0x88;
    "concat" Concat = 0x9A;
    "construct" Construct = 0x42 [U30];
    "constructprop" ConstructProp = 0x4A [U30 U30];
    "constructsuper" ConstructSuper = 0x49 [U30];
    "convert_b" ConvertB = 0x76;
    "convert_d" ConvertD = 0x75;
    "convert_i" ConvertI = 0x73;
    "convert_o" ConvertO = 0x77;
    "convert_s" ConvertS = 0x70;
    "convert_u" ConvertU = 0x74;
    "debug" Debug = 0xEF [U8 U30 U8 U30];
    "debugfile" DebugFile = 0xF1 [U30];
    "debugline" DebugLine = 0xF0 [U30];
    "declocal" DecLocal = 0x94 [U30];
    "declocal_i" DecLocalI = 0xC3 [U30];
    "decrement" Decrement = 0x93;
    "decrement_i" DecrementI = 0xC1;
    "deleteproperty" DeleteProperty = 0x6A [U30];
    "deletepropertylate" DeletePropertyLate = 0x6B;
    "divide" Divide = 0xA3;
    "dup" Dup = 0x2A;
    "dxns" Dxns = 0x06 [U30];
    "dxnslate" DxnsLate = 0x07;
    "equals" Equals = 0xAB;
    "esc_xattr" EscXAttr = 0x72;
    "esc_xelem" EscXElem = 0x71;
    "finddef" FindDef = 0x5F [U30];
    "findproperty" FindProperty = 0x5E [U30];
    "findpropglobal" FindPropGlobal = 0x5C [U30];
    "findpropglobalstrict" FindPropGlobalStrict = 0x5B [U30];
    "findpropstrict" FindPropStrict = 0x5D [U30];
    "getdescendants" GetDescendants = 0x59 [U30];
    "getglobalscope" GetGlobalScope = 0x64;
    "getglobalslot" GetGlobalSlot = 0x6E [U30];
    "getlex" GetLex = 0x60 [U30];
    "getlocal" GetLocal = 0x62 [U30];
    "getlocal0" GetLocal0 = 0xD0;
    "getlocal1" GetLocal1 = 0xD1;
    "getlocal2" GetLocal2 = 0xD2;
    "getlocal3" GetLocal3 = 0xD3;
    "getouterscope" GetOuterScope = 0x67 [U30];
    "getproperty" GetProperty = 0x66 [U30];
    "getscopeobject" GetScopeObject = 0x65 [U8];
    "getslot" GetSlot = 0x6C [U30];
    "getsuper" GetSuper = 0x04 [U30];
    "greaterequals" GreaterEquals = 0xB0;
    "greaterthan" GreaterThan = 0xAF;
    "hasnext" HasNext = 0x1F;
    "hasnext2" HasNext2 = 0x32 [U30 U30];
    "ifeq" IfEq = 0x13 [S24];
    "iffalse" IfFalse = 0x12 [S24];
    "ifge" IfGe = 0x18 [S24];
    "ifgt" IfGt = 0x17 [S24];
    "ifle" IfLe = 0x16 [S24];
    "iflt" IfLt = 0x15 [S24];
    "ifne" IfNe = 0x14 [S24];
    "ifnge" IfNge = 0x0F [S24];
    "ifngt" IfNgt = 0x0E [S24];
    "ifnle" IfNle = 0x0D [S24];
    "ifnlt" IfNlt = 0x0C [S24];
    "ifstricteq" IfStrictEq = 0x19 [S24];
    "ifstrictne" IfStrictNe = 0x1A [S24];
    "iftrue" IfTrue = 0x11 [S24];
    "in" In = 0xB4;
    "inclocal" IncLocal = 0x92 [U30];
    "inclocal_i" IncLocalI = 0xC2 [U30];
    "increment" Increment = 0x91;
    "increment_i" IncrementI = 0xC0;
    "initproperty" InitProperty = 0x68 [U30];
    "instanceof" InstanceOf = 0xB1;
    "istype" IsType = 0xB2 [U30];
    "istypelate" IsTypeLate = 0xB3;
    "jump" Jump = 0x10 [S24];
    "kill" Kill = 0x08 [U30];
    "label" Label = 0x09;
    "lessequals" LessEquals = 0xAE;
    "lessthan" LessThan = 0xAD;
    "lf32" Lf32 = 0x38;
    "lf64" Lf64 = 0x39;
    "li16" Li16 = 0x36;
    "li32" Li32 = 0x37;
    "li8" Li8 = 0x35;
    "lookupswitch" LookupSwitch = 0x1B [S24 S24Arr];
    "lshift" Lshift = 0xA5;
    "modulo" Modulo = 0xA4;
    "multiply" Multiply = 0xA2;
    "multiply_i" MultiplyI = 0xC7;
    "negate" Negate = 0x90;
    "negate_i" NegateI = 0xC4;
    "newactivation" NewActivation = 0x57;
    "newarray" NewArray = 0x56 [U30];
    "newcatch" NewCatch = 0x5A [U30];
    "newclass" NewClass = 0x58 [U30];
    "newfunction" NewFunction = 0x40 [U30];
    "newobject" NewObject = 0x55 [U30];
    "nextname" NextName = 0x1E;
    "nextvalue" NextValue = 0x23;
    "nop" Nop = 0x02;
    "not" Not = 0x96;
    "pop" Pop = 0x29;
    "popscope" PopScope = 0x1D;
    "pushbyte" PushByte = 0x24 [U8];
    "pushconstant" PushConstant = 0x22 [U30];
    "pushdecimal" PushDecimal = 0x33 [U30];
    "pushdnan" PushDnan = 0x34;
    "pushdouble" PushDouble = 0x2F [U30];
    "pushfalse" PushFalse = 0x27;
    "pushint" PushInt = 0x2D [U30];
    "pushnamespace" PushNamespace = 0x31 [U30];
    "pushnan" PushNan = 0x28;
    "pushnull" PushNull = 0x20;
    "pushscope" PushScope = 0x30;
    "pushshort" PushShort = 0x25 [S32];
    "pushstring" PushString = 0x2C [U30];
    "pushtrue" PushTrue = 0x26;
    "pushuint" PushUint = 0x2E [U30];
    "pushundefined" PushUndefined = 0x21;
    "pushwith" PushWith = 0x1C;
    "returnvalue" ReturnValue = 0x48;
    "returnvoid" ReturnVoid = 0x47;
    "rshift" Rshift = 0xA6;
    "setglobalslot" SetGlobalSlot = 0x6F [U30];
    "setlocal" SetLocal = 0x63 [U30];
    "setlocal0" SetLocal0 = 0xD4;
    "setlocal1" SetLocal1 = 0xD5;
    "setlocal2" SetLocal2 = 0xD6;
    "setlocal3" SetLocal3 = 0xD7;
    "setproperty" SetProperty = 0x61 [U30];
    "setpropertylate" SetPropertyLate = 0x69;
    "setslot" SetSlot = 0x6D [U30];
    "setsuper" SetSuper = 0x05 [U30];
    "sf32" Sf32 = 0x3D;
    "sf64" Sf64 = 0x3E;
    "si16" Si16 = 0x3B;
    "si32" Si32 = 0x3C;
    "si8" Si8 = 0x3A;
    "strictequals" StrictEquals = 0xAC;
    "subtract" Subtract = 0xA1;
    "subtract_i" SubtractI = 0xC6;
    "swap" Swap = 0x2B;
    "sxi1" Sxi1 = 0x50;
    "sxi16" Sxi16 = 0x52;
    "sxi8" Sxi8 = 0x51;
    "throw" Throw = 0x03;
    "typeof" TypeOf = 0x95;
    "unknown_7d" Unknown7D = 0x7D;
    "urshift" Urshift = 0xA7;
}

static BY_BYTE: Lazy<[Option<&'static OpDesc>; 256]> = Lazy::new(|| {
    let mut table = [None; 256];
    for desc in TABLE {
        table[usize::from(desc.byte)] = Some(desc);
    }
    table
});

impl Op {
    /// Constant-time lookup of the table row for an opcode byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        BY_BYTE[usize::from(byte)].map(|desc| desc.op)
    }

    #[must_use]
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// A decoded operand, tagged with its wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    U8(u8),
    U16(u16),
    U32(u32),
    U30(u32),
    S24(i32),
    S32(i32),
    /// The `lookupswitch` jump table: the raw case displacements, one more
    /// than the wire-level count.
    CaseTable(Vec<i32>),
}

impl Operand {
    fn kind(&self) -> ArgKind {
        match self {
            Self::U8(_) => ArgKind::U8,
            Self::U16(_) => ArgKind::U16,
            Self::U32(_) => ArgKind::U32,
            Self::U30(_) => ArgKind::U30,
            Self::S24(_) => ArgKind::S24,
            Self::S32(_) => ArgKind::S32,
            Self::CaseTable(_) => ArgKind::S24Arr,
        }
    }
}

/// One decoded instruction.
///
/// `args` holds raw operand values exactly as they appeared on the wire
/// (displacements stay relative); `targets` holds the resolved absolute byte
/// offsets of every branch edge. Assembly works from `args` alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    /// Byte offset of the opcode within the enclosing code buffer.
    pub address: u32,
    pub args: Vec<Operand>,
    pub targets: Vec<u32>,
}

impl Instruction {
    fn decode_one(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let address = r.pos() as u32;
        let byte = r.read_u8()?;
        let op = Op::from_byte(byte).ok_or(DecodeError {
            kind: DecodeErrorKind::UnknownOpcode(byte),
            offset: Some(address as usize),
        })?;

        let mut args = Vec::with_capacity(op.args().len());
        let mut targets = Vec::new();
        for &kind in op.args() {
            match kind {
                ArgKind::U8 => args.push(Operand::U8(r.read_u8()?)),
                ArgKind::U16 => args.push(Operand::U16(r.read_u16()?)),
                ArgKind::U32 => args.push(Operand::U32(r.read_u32()?)),
                ArgKind::U30 => args.push(Operand::U30(r.read_var_u32()?)),
                ArgKind::S32 => args.push(Operand::S32(r.read_var_i32()?)),
                ArgKind::S24 => {
                    let disp = r.read_s24()?;
                    // Every ordinary branch is relative to the byte after its
                    // displacement; lookupswitch displacements are relative
                    // to the start of the instruction.
                    let base = if op == Op::LookupSwitch {
                        address
                    } else {
                        r.pos() as u32
                    };
                    targets.push(base.wrapping_add(disp as u32));
                    args.push(Operand::S24(disp));
                }
                ArgKind::S24Arr => {
                    let count = r.read_var_u32()? as usize + 1;
                    let mut cases = Vec::with_capacity(count.min(r.remaining() / 3 + 1));
                    for _ in 0..count {
                        let disp = r.read_s24()?;
                        targets.push(address.wrapping_add(disp as u32));
                        cases.push(disp);
                    }
                    args.push(Operand::CaseTable(cases));
                }
            }
        }

        Ok(Self {
            op,
            address,
            args,
            targets,
        })
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}  {}", self.address, self.op.mnemonic())?;
        for arg in &self.args {
            match arg {
                Operand::U8(v) => write!(f, " {v}")?,
                Operand::U16(v) => write!(f, " {v}")?,
                Operand::U32(v) => write!(f, " {v}")?,
                Operand::U30(v) => write!(f, " {v}")?,
                Operand::S24(v) | Operand::S32(v) => write!(f, " {v}")?,
                Operand::CaseTable(cases) => write!(f, " {cases:?}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
enum AssembleError {
    #[error("{mnemonic} expects {expected} operand(s), found {found}")]
    ArityMismatch {
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("operand of kind {found:?} cannot encode as {expected:?}")]
    KindMismatch { expected: ArgKind, found: ArgKind },
    #[error("lookupswitch case table cannot be empty")]
    EmptyCaseTable,
}

impl From<AssembleError> for std::io::Error {
    fn from(err: AssembleError) -> Self {
        Self::new(std::io::ErrorKind::InvalidData, err)
    }
}

impl Encode for Instruction {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        io::write_u8(w, self.op.byte())?;
        let kinds = self.op.args();
        if kinds.len() != self.args.len() {
            return Err(AssembleError::ArityMismatch {
                mnemonic: self.op.mnemonic(),
                expected: kinds.len(),
                found: self.args.len(),
            }
            .into());
        }
        for (arg, &kind) in self.args.iter().zip(kinds) {
            match (kind, arg) {
                (ArgKind::U8, Operand::U8(v)) => io::write_u8(w, *v)?,
                (ArgKind::U16, Operand::U16(v)) => io::write_u16(w, *v)?,
                (ArgKind::U32, Operand::U32(v)) => io::write_u32(w, *v)?,
                (ArgKind::U30, Operand::U30(v)) => io::write_var_u32(w, *v)?,
                (ArgKind::S32, Operand::S32(v)) => io::write_var_i32(w, *v)?,
                (ArgKind::S24, Operand::S24(v)) => io::write_s24(w, *v)?,
                (ArgKind::S24Arr, Operand::CaseTable(cases)) => {
                    let count = cases
                        .len()
                        .checked_sub(1)
                        .ok_or(AssembleError::EmptyCaseTable)?;
                    io::write_var_u32(w, count as u32)?;
                    for &case in cases {
                        io::write_s24(w, case)?;
                    }
                }
                (expected, found) => {
                    return Err(AssembleError::KindMismatch {
                        expected,
                        found: found.kind(),
                    }
                    .into())
                }
            }
        }
        Ok(())
    }
}

impl Encode for [Instruction] {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        for instruction in self {
            instruction.encode(w)?;
        }
        Ok(())
    }
}

/// An ordered disassembly of one method body's `code` buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstructionStream {
    pub instructions: Vec<Instruction>,
}

impl InstructionStream {
    /// Disassembles a complete code buffer.
    pub fn disassemble(code: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(&mut Reader::new(code))
    }

    /// Re-serializes the stream. Inverse of [`Self::disassemble`] for any
    /// well-formed buffer.
    pub fn assemble(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.instructions.as_slice().encode(&mut out)?;
        Ok(out)
    }
}

impl Decode for InstructionStream {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut instructions = Vec::new();
        while !r.is_empty() {
            instructions.push(Instruction::decode_one(r)?);
        }
        Ok(Self { instructions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_injective() {
        let mut seen = [false; 256];
        for desc in TABLE {
            assert!(!seen[usize::from(desc.byte)], "duplicate 0x{:02X}", desc.byte);
            seen[usize::from(desc.byte)] = true;
            assert_eq!(Op::from_byte(desc.byte), Some(desc.op));
            assert_eq!(desc.op.byte(), desc.byte);
            assert_eq!(desc.op.mnemonic(), desc.mnemonic);
            assert_eq!(desc.op.args(), desc.args);
        }
    }

    #[test]
    fn unknown_opcode() {
        let err = InstructionStream::disassemble(&[0xFB]).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::UnknownOpcode(0xFB)));
        assert_eq!(err.offset, Some(0));
    }

    #[test]
    fn ordinary_branch_targets_are_post_read() {
        // getlocal0; jump +2 skipping the two pushbyte bytes; pushbyte 7; nop
        let code = [0xD0, 0x10, 0x02, 0x00, 0x00, 0x24, 0x07, 0x02];
        let stream = InstructionStream::disassemble(&code).unwrap();
        let jump = &stream.instructions[1];
        assert_eq!(jump.op, Op::Jump);
        assert_eq!(jump.address, 1);
        // Displacement is added to the offset after its three bytes.
        assert_eq!(jump.targets, [7]);
        assert_eq!(jump.args, [Operand::S24(2)]);

        // Backward branch.
        let code = [0x02, 0x12, 0xFC, 0xFF, 0xFF];
        let stream = InstructionStream::disassemble(&code).unwrap();
        assert_eq!(stream.instructions[1].targets, [1]);
    }

    #[test]
    fn lookupswitch_targets_anchor_at_instruction_start() {
        // lookupswitch at offset 1 (after a nop): default +16, case count
        // wire value 2 (three actual cases), displacements 4, 8, -1.
        let code = [
            0x02, // nop
            0x1B, // lookupswitch
            0x10, 0x00, 0x00, // default +16
            0x02, // case_count
            0x04, 0x00, 0x00, // case +4
            0x08, 0x00, 0x00, // case +8
            0xFF, 0xFF, 0xFF, // case -1
        ];
        let stream = InstructionStream::disassemble(&code).unwrap();
        let switch = &stream.instructions[1];
        assert_eq!(switch.op, Op::LookupSwitch);
        assert_eq!(switch.address, 1);
        assert_eq!(switch.targets, [1 + 16, 1 + 4, 1 + 8, 0]);
        assert_eq!(
            switch.args,
            [Operand::S24(16), Operand::CaseTable(vec![4, 8, -1])]
        );

        assert_eq!(stream.assemble().unwrap(), code);
    }

    #[test]
    fn round_trip_every_operand_shape() {
        let mut code = Vec::new();
        // debug: u8, u30, u8, u30
        code.extend([0xEF, 0x01, 0x85, 0x02, 0x00, 0x03]);
        // pushshort: s32, negative (wrapped encoding)
        code.extend([0x25, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        // getscopeobject: u8
        code.extend([0x65, 0x02]);
        // callproperty: u30 u30
        code.extend([0x46, 0x03, 0x01]);
        // iftrue: s24
        code.extend([0x11, 0xF6, 0xFF, 0xFF]);
        // returnvoid
        code.push(0x47);

        let stream = InstructionStream::disassemble(&code).unwrap();
        assert_eq!(stream.instructions.len(), 6);
        assert_eq!(stream.instructions[1].args, [Operand::S32(-1)]);
        assert_eq!(stream.assemble().unwrap(), code);
    }

    #[test]
    fn truncated_operand() {
        let err = InstructionStream::disassemble(&[0x10, 0x01]).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::Truncated));
    }

    #[test]
    fn assemble_rejects_malformed_streams() {
        let missing = Instruction {
            op: Op::Jump,
            address: 0,
            args: vec![],
            targets: vec![],
        };
        let mut out = Vec::new();
        assert!(missing.encode(&mut out).is_err());

        let wrong_kind = Instruction {
            op: Op::Jump,
            address: 0,
            args: vec![Operand::U30(1)],
            targets: vec![],
        };
        assert!(wrong_kind.encode(&mut out).is_err());
    }
}
