//! Built-in minimal fallback prompt, used when no `prompt.md` is found at any
//! precedence location.

pub const FALLBACK: &str = "# No prompt template found\nImplement the next story from prd.json.";
