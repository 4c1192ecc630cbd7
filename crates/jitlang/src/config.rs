//! Pipeline-wide configuration (`SPEC_FULL.md` §4.8).

/// Knobs that apply across every module advanced by a given
/// [`crate::context::global::GlobalContext`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub import_paths: Vec<String>,
    /// When false, bypasses the bytes/unicode constant pool dedup
    /// (`spec.md` §6 "Constants pool" — "bypassable with a 'no sharing' flag
    /// for mutable initializers").
    pub share_constants: bool,
    /// Bounds dispatcher re-entrancy depth; guards against runaway mutual
    /// recompilation loops rather than any language-level recursion limit.
    pub max_recursion_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            import_paths: Vec::new(),
            share_constants: true,
            max_recursion_depth: 512,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_import_paths(import_paths: Vec<String>) -> Self {
        Self {
            import_paths,
            ..Self::default()
        }
    }
}
