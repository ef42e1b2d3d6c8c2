//! Prompt template loading and placeholder substitution.
//!
//! Templates live as plain text files in the configured prompts directory and
//! use `{name}` placeholders. `{{` and `}}` escape literal braces so templates
//! can embed JSON examples. A placeholder with no supplied value is a
//! deployment misconfiguration and fails the step that hit it.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompts directory does not exist: {0}")]
    DirMissing(PathBuf),

    #[error("prompt file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read prompt file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("prompt template references unknown placeholder: {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("prompt template has an unterminated placeholder")]
    UnterminatedPlaceholder,
}

/// Loads prompt template files from a fixed directory.
#[derive(Debug, Clone)]
pub struct PromptLoader {
    dir: PathBuf,
}

impl PromptLoader {
    /// Fails fast if the directory does not exist, so a bad `PROMPTS_DIR`
    /// surfaces at startup instead of on the first run.
    pub fn new(dir: PathBuf) -> Result<Self, PromptError> {
        if !dir.is_dir() {
            return Err(PromptError::DirMissing(dir));
        }
        Ok(PromptLoader { dir })
    }

    pub fn load(&self, name: &str) -> Result<String, PromptError> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(PromptError::NotFound(path));
        }
        std::fs::read_to_string(&path).map_err(|source| PromptError::Io { path, source })
    }
}

/// Substitutes `{name}` placeholders in a template with the supplied values.
/// Every placeholder in the template must have a value; extra values are fine.
pub fn render(template: &str, values: &[(&str, &str)]) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => key.push(c),
                        None => return Err(PromptError::UnterminatedPlaceholder),
                    }
                }
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => return Err(PromptError::UnknownPlaceholder(key)),
                }
            }
            '}' => {
                // Treat `}}` as an escaped literal; a lone `}` passes through.
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                out.push('}');
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_render_substitutes_placeholders() {
        let out = render(
            "Question: {question}\nJD: {jd_text}",
            &[("question", "Why us?"), ("jd_text", "Rust engineer")],
        )
        .unwrap();
        assert_eq!(out, "Question: Why us?\nJD: Rust engineer");
    }

    #[test]
    fn test_render_same_placeholder_twice() {
        let out = render("{q} and again {q}", &[("q", "x")]).unwrap();
        assert_eq!(out, "x and again x");
    }

    #[test]
    fn test_render_unknown_placeholder_is_error() {
        let err = render("Hello {who}", &[("question", "hi")]).unwrap_err();
        assert!(matches!(err, PromptError::UnknownPlaceholder(key) if key == "who"));
    }

    #[test]
    fn test_render_escaped_braces_pass_through() {
        let out = render(r#"Return {{"score": {score}}}"#, &[("score", "4")]).unwrap();
        assert_eq!(out, r#"Return {"score": 4}"#);
    }

    #[test]
    fn test_render_unterminated_placeholder_is_error() {
        let err = render("broken {question", &[("question", "q")]).unwrap_err();
        assert!(matches!(err, PromptError::UnterminatedPlaceholder));
    }

    #[test]
    fn test_loader_reads_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step1_question_analysis.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "Analyze: {{question}}").unwrap();

        let loader = PromptLoader::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(
            loader.load("step1_question_analysis.txt").unwrap(),
            "Analyze: {question}"
        );
    }

    #[test]
    fn test_loader_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PromptLoader::new(dir.path().to_path_buf()).unwrap();
        let err = loader.load("nope.txt").unwrap_err();
        assert!(matches!(err, PromptError::NotFound(_)));
    }

    #[test]
    fn test_loader_missing_dir_fails_at_construction() {
        let err = PromptLoader::new(PathBuf::from("/definitely/not/a/dir")).unwrap_err();
        assert!(matches!(err, PromptError::DirMissing(_)));
    }
}
