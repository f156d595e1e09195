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

//! Newtypes for pool indices.
//!
//! Every cross-reference inside an ABC block is an integer index into one of
//! the pools owned by the enclosing unit. Each index kind gets its own
//! newtype so that a method index cannot be handed to a multiname lookup;
//! all of them serialize as variable-length u30.

use crate::io::{Decode, DecodeError, Encode, Reader};

macro_rules! newtype_id {
    ($name:ident, $pool:literal) => {
        #[derive(PartialEq, Eq, Clone, Copy, Hash, Default, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name {
            pub index: u32,
        }

        impl $name {
            pub const ZERO: Self = Self { index: 0 };

            /// The index as a `usize`, for direct pool slicing.
            #[must_use]
            pub fn index(self) -> usize {
                self.index as usize
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                Self { index }
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.index
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}#{}", $pool, self.index)
            }
        }

        impl Encode for $name {
            fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
                crate::io::write_var_u32(w, self.index)
            }
        }

        impl Decode for $name {
            fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                Ok(Self {
                    index: r.read_var_u32()?,
                })
            }
        }
    };
}

newtype_id!(IntId, "Int");
newtype_id!(UintId, "Uint");
newtype_id!(DoubleId, "Double");
newtype_id!(StringId, "String");
newtype_id!(NamespaceId, "Namespace");
newtype_id!(NsSetId, "NsSet");
newtype_id!(MultinameId, "Multiname");
newtype_id!(MethodId, "Method");
newtype_id!(MetadataId, "Metadata");
newtype_id!(ClassId, "Class");
