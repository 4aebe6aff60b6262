//! Script normalization and entry-point discovery.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::RenderError;

/// Import line the rendering tool needs at the top of every script.
const PREAMBLE: &str = "from manim import *";

// A class deriving from Scene or one of its specialised bases
// (ThreeDScene, MovingCameraScene, ...).
static SCENE_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*class\s+(\w+)\s*\(\s*(?:\w+\.)?\w*Scene\s*[,)]").expect("valid regex")
});

static ANY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*class\s+(\w+)").expect("valid regex"));

/// Unescape literal `\n` sequences and make sure the tool's import is present.
pub fn normalize(code: &str) -> String {
    let cleaned = code.replace("\\n", "\n");
    if cleaned.contains(PREAMBLE) || cleaned.contains("import manim") {
        cleaned
    } else {
        format!("{PREAMBLE}\n\n{cleaned}")
    }
}

/// Name of the class the tool should render.
///
/// Prefers the first class deriving from a scene type, then falls back to the
/// first class declared at all.
pub fn entry_point(code: &str) -> Result<String, RenderError> {
    SCENE_CLASS
        .captures(code)
        .or_else(|| ANY_CLASS.captures(code))
        .map(|caps| caps[1].to_string())
        .ok_or(RenderError::NoEntryPointFound)
}
