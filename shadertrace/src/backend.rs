//! Back-end dispatch.
//!
//! The crate never talks to a real shader compiler: Slang/glslang/DXC/
//! SPIRV-Cross/D3DCompile are represented as a pluggable [`Translator`]
//! trait so host applications (and tests) can register whatever toolchain
//! they actually have installed without this crate linking against any of
//! them.
use crate::reflection::ShaderResources;
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ShaderLanguage {
    Glsl,
    Hlsl,
    Dxil,
    Dxbc,
    SpirV,
    Slang,
}

impl fmt::Display for ShaderLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShaderLanguage::Glsl => "GLSL",
            ShaderLanguage::Hlsl => "HLSL",
            ShaderLanguage::Dxil => "DXIL",
            ShaderLanguage::Dxbc => "DXBC",
            ShaderLanguage::SpirV => "SPIR-V",
            ShaderLanguage::Slang => "Slang",
        };
        f.write_str(s)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct CompilerOption {
    pub compile_glsl: bool,
    pub compile_hlsl: bool,
    pub compile_dxil: bool,
    pub compile_dxbc: bool,
    pub compile_spirv: bool,
    pub enable_bindless: bool,
}

impl Default for CompilerOption {
    fn default() -> Self {
        CompilerOption {
            compile_glsl: true,
            compile_hlsl: true,
            compile_dxil: true,
            compile_dxbc: true,
            compile_spirv: true,
            enable_bindless: true,
        }
    }
}

/// One translated artifact: either textual source in the target language or
/// a compiled binary (SPIR-V/DXIL/DXBC words).
#[derive(Clone, Debug)]
pub enum CompiledShader {
    Source(String),
    Binary(Vec<u32>),
}

impl CompiledShader {
    pub fn as_source(&self) -> Option<&str> {
        match self {
            CompiledShader::Source(s) => Some(s),
            CompiledShader::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u32]> {
        match self {
            CompiledShader::Binary(b) => Some(b),
            CompiledShader::Source(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no translator registered for target language {0}")]
    NoTranslator(ShaderLanguage),
    #[error("translation to {language} failed: {message}")]
    Failed { language: ShaderLanguage, message: String },
}

/// Implemented by a pluggable Slang-source-to-target translator. A host
/// embeds e.g. an FFI wrapper around `slangc` or `DXC`; this crate ships a
/// [`MockTranslator`] for tests and for running without any native
/// toolchain installed.
pub trait Translator: Send + Sync {
    fn translate(&self, slang_source: &str, target: ShaderLanguage, resources: &ShaderResources) -> Result<CompiledShader, TranslateError>;
}

/// Echoes the Slang source back (for text targets) or a deterministic dummy
/// word stream (for binary targets), so pipelines and tests can exercise the
/// full dispatch path without a real compiler on `PATH`.
pub struct MockTranslator;

impl Translator for MockTranslator {
    fn translate(&self, slang_source: &str, target: ShaderLanguage, _resources: &ShaderResources) -> Result<CompiledShader, TranslateError> {
        match target {
            ShaderLanguage::Slang | ShaderLanguage::Glsl | ShaderLanguage::Hlsl => {
                Ok(CompiledShader::Source(slang_source.to_string()))
            }
            ShaderLanguage::SpirV | ShaderLanguage::Dxil | ShaderLanguage::Dxbc => {
                Ok(CompiledShader::Binary(slang_source.bytes().map(|b| b as u32).collect()))
            }
        }
    }
}

/// Registry of translators by target language, consulted by
/// `pipeline::compile_pipeline`.
pub struct BackendRegistry {
    translators: HashMap<ShaderLanguage, Arc<dyn Translator>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry {
            translators: HashMap::new(),
        }
    }

    /// A registry with [`MockTranslator`] wired up for every language.
    pub fn with_mock_translator() -> Self {
        let mut registry = BackendRegistry::new();
        let mock: Arc<dyn Translator> = Arc::new(MockTranslator);
        for lang in [
            ShaderLanguage::Glsl,
            ShaderLanguage::Hlsl,
            ShaderLanguage::Dxil,
            ShaderLanguage::Dxbc,
            ShaderLanguage::SpirV,
            ShaderLanguage::Slang,
        ] {
            registry.register(lang, mock.clone());
        }
        registry
    }

    pub fn register(&mut self, language: ShaderLanguage, translator: Arc<dyn Translator>) {
        self.translators.insert(language, translator);
    }

    pub fn translate(
        &self,
        slang_source: &str,
        target: ShaderLanguage,
        resources: &ShaderResources,
    ) -> Result<CompiledShader, TranslateError> {
        let translator = self.translators.get(&target).ok_or(TranslateError::NoTranslator(target))?;
        translator.translate(slang_source, target, resources)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_mock_translator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_reports_no_translator() {
        let registry = BackendRegistry::new();
        let resources = ShaderResources::default();
        let err = registry.translate("void main() {}", ShaderLanguage::Slang, &resources).unwrap_err();
        assert!(matches!(err, TranslateError::NoTranslator(ShaderLanguage::Slang)));
    }

    #[test]
    fn mock_translator_echoes_source_for_text_targets() {
        let registry = BackendRegistry::with_mock_translator();
        let resources = ShaderResources::default();
        let compiled = registry.translate("float x;", ShaderLanguage::Hlsl, &resources).unwrap();
        assert_eq!(compiled.as_source(), Some("float x;"));
        assert_eq!(compiled.as_binary(), None);
    }

    #[test]
    fn mock_translator_produces_a_binary_word_stream_for_spirv() {
        let registry = BackendRegistry::with_mock_translator();
        let resources = ShaderResources::default();
        let compiled = registry.translate("ab", ShaderLanguage::SpirV, &resources).unwrap();
        assert_eq!(compiled.as_binary(), Some(&[b'a' as u32, b'b' as u32][..]));
    }

    #[test]
    fn registering_a_custom_translator_overrides_the_mock() {
        struct Upper;
        impl Translator for Upper {
            fn translate(&self, src: &str, _target: ShaderLanguage, _res: &ShaderResources) -> Result<CompiledShader, TranslateError> {
                Ok(CompiledShader::Source(src.to_uppercase()))
            }
        }
        let mut registry = BackendRegistry::with_mock_translator();
        registry.register(ShaderLanguage::Glsl, Arc::new(Upper));
        let resources = ShaderResources::default();
        let compiled = registry.translate("abc", ShaderLanguage::Glsl, &resources).unwrap();
        assert_eq!(compiled.as_source(), Some("ABC"));
    }
}
