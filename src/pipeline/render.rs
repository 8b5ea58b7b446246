//! Preview rendering: recognised LaTeX → display markup.
//!
//! Rendering never fails a prediction. A renderer that rejects the
//! expression yields a [`RenderError`]; the caller keeps the text result and
//! shows [`RENDER_FALLBACK`] in place of the preview.
//!
//! The built-in [`DelimitedRenderer`] checks the structure a typesetter
//! would choke on first (brace balance, `\left`/`\right` pairing) and wraps
//! the expression in math delimiters. Hosts with a real typesetter plug it in
//! through [`MathRenderer`].

use crate::error::RenderError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shown instead of the preview when rendering fails.
pub const RENDER_FALLBACK: &str =
    "Unable to render preview. Output is malformed, you may be able to fix it manually.";

/// Inline (`$…$`) or display (`$$…$$`) math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Inline,
    #[default]
    Display,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RenderMode::Inline => "inline",
            RenderMode::Display => "display",
        })
    }
}

/// Turns a LaTeX expression into preview markup.
pub trait MathRenderer: Send + Sync {
    fn render(&self, latex: &str, mode: RenderMode) -> Result<String, RenderError>;
}

/// Structural checks plus `$`/`$$` delimiters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedRenderer;

static RE_LEFT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\left(?:[^A-Za-z]|$)").unwrap());
static RE_RIGHT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\right(?:[^A-Za-z]|$)").unwrap());

impl MathRenderer for DelimitedRenderer {
    fn render(&self, latex: &str, mode: RenderMode) -> Result<String, RenderError> {
        let latex = latex.trim();
        if latex.is_empty() {
            return Err(RenderError::Empty);
        }
        check_braces(latex)?;

        let left = RE_LEFT.find_iter(latex).count();
        let right = RE_RIGHT.find_iter(latex).count();
        if left != right {
            return Err(RenderError::UnpairedDelimiters { left, right });
        }

        Ok(match mode {
            RenderMode::Inline => format!("${latex}$"),
            RenderMode::Display => format!("$$\n{latex}\n$$"),
        })
    }
}

/// Unescaped `{`/`}` must nest. Reports the offending byte offset.
fn check_braces(latex: &str) -> Result<(), RenderError> {
    let mut open = Vec::new();
    let mut chars = latex.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '{' => open.push(i),
            '}' => {
                if open.pop().is_none() {
                    return Err(RenderError::UnbalancedBraces { position: i });
                }
            }
            _ => {}
        }
    }
    match open.pop() {
        Some(position) => Err(RenderError::UnbalancedBraces { position }),
        None => Ok(()),
    }
}

/// Render `latex`, substituting [`RENDER_FALLBACK`] on failure.
pub fn render_preview(
    renderer: &dyn MathRenderer,
    latex: &str,
    mode: RenderMode,
) -> (String, Option<RenderError>) {
    match renderer.render(latex, mode) {
        Ok(markup) => (markup, None),
        Err(e) => {
            tracing::warn!("Preview rendering failed: {}", e);
            (RENDER_FALLBACK.to_string(), Some(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_by_mode() {
        let r = DelimitedRenderer;
        assert_eq!(r.render("x^{2}", RenderMode::Inline).unwrap(), "$x^{2}$");
        assert_eq!(r.render("x", RenderMode::Display).unwrap(), "$$\nx\n$$");
    }

    #[test]
    fn escaped_braces_are_not_groups() {
        assert!(DelimitedRenderer.render(r"\{a\}", RenderMode::Inline).is_ok());
        assert!(DelimitedRenderer.render(r"\\{a}", RenderMode::Inline).is_ok());
    }

    #[test]
    fn unbalanced_braces_rejected() {
        assert_eq!(
            DelimitedRenderer.render("x}", RenderMode::Inline),
            Err(RenderError::UnbalancedBraces { position: 1 })
        );
        assert_eq!(
            DelimitedRenderer.render("{{x}", RenderMode::Inline),
            Err(RenderError::UnbalancedBraces { position: 0 })
        );
    }

    #[test]
    fn left_right_must_pair() {
        assert!(DelimitedRenderer
            .render(r"\left(x\right)", RenderMode::Inline)
            .is_ok());
        assert_eq!(
            DelimitedRenderer.render(r"\left(x", RenderMode::Inline),
            Err(RenderError::UnpairedDelimiters { left: 1, right: 0 })
        );
        // Arrows are not delimiters.
        assert!(DelimitedRenderer
            .render(r"a\rightarrow b\leftarrow c", RenderMode::Inline)
            .is_ok());
    }

    #[test]
    fn fallback_on_failure() {
        let (preview, err) = render_preview(&DelimitedRenderer, "", RenderMode::Display);
        assert_eq!(preview, RENDER_FALLBACK);
        assert_eq!(err, Some(RenderError::Empty));
    }

    #[test]
    fn custom_renderer_is_used() {
        struct Shout;
        impl MathRenderer for Shout {
            fn render(&self, latex: &str, _: RenderMode) -> Result<String, RenderError> {
                Ok(latex.to_uppercase())
            }
        }
        let (preview, err) = render_preview(&Shout, "ab", RenderMode::Inline);
        assert_eq!((preview.as_str(), err), ("AB", None));
    }
}
