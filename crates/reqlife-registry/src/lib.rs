// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! The `Translator`/`Adapter` extension points and their registries.

mod adapter;
mod translator;

pub use adapter::{Adapter, AdapterContext, AdapterRegistry};
pub use translator::{Translator, TranslatorContext, TranslatorKey, TranslatorRegistry};
