//! Fenced code block scanning. The fence grammar is a line-level state
//! machine: an info string may carry a language tag and a filename hint
//! (`title=`, `filename=` or a bare path token).

#[derive(Debug, Clone, PartialEq)]
pub struct CodeSnippet {
    language: Option<String>,
    filename: Option<String>,
    code: String,
}

impl CodeSnippet {
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

fn parse_info_string(info: &str) -> (Option<String>, Option<String>) {
    let mut tokens = info.split_whitespace();
    let language = tokens
        .next()
        .filter(|token| !token.contains('.'))
        .map(|token| token.to_lowercase());
    let mut filename = None;
    // the first token may itself be a path when no language tag is given
    if language.is_none() {
        if let Some(first) = info.split_whitespace().next() {
            if first.contains('.') {
                filename = Some(first.to_owned());
            }
        }
    }
    for token in tokens {
        let value = token
            .strip_prefix("title=")
            .or_else(|| token.strip_prefix("filename="))
            .or_else(|| token.strip_prefix("file:"))
            .unwrap_or(token);
        let value = value.trim_matches('"');
        if value.contains('.') && !value.contains("://") {
            filename = Some(value.to_owned());
            break;
        }
    }
    (language, filename)
}

pub fn parse_fenced_blocks(text: &str) -> Vec<CodeSnippet> {
    let mut snippets = Vec::new();
    let mut current: Option<(Option<String>, Option<String>, Vec<&str>)> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            match current.take() {
                Some((language, filename, lines)) => {
                    snippets.push(CodeSnippet {
                        language,
                        filename,
                        code: lines.join("\n"),
                    });
                }
                None => {
                    let (language, filename) = parse_info_string(rest);
                    current = Some((language, filename, Vec::new()));
                }
            }
        } else if let Some((_, _, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    // an unterminated fence still counts, clients truncate mid-stream
    if let Some((language, filename, lines)) = current {
        if !lines.is_empty() {
            snippets.push(CodeSnippet {
                language,
                filename,
                code: lines.join("\n"),
            });
        }
    }
    snippets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_and_body_are_captured() {
        let blocks = parse_fenced_blocks("before\n```rust\nfn main() {}\n```\nafter");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language(), Some("rust"));
        assert_eq!(blocks[0].code(), "fn main() {}");
    }

    #[test]
    fn filename_hints_are_recognized() {
        let blocks = parse_fenced_blocks("```python title=app/main.py\nimport os\n```");
        assert_eq!(blocks[0].filename(), Some("app/main.py"));

        let blocks = parse_fenced_blocks("```text requirements.txt\nrequests\n```");
        assert_eq!(blocks[0].filename(), Some("requirements.txt"));
    }

    #[test]
    fn bare_path_info_string_is_a_filename() {
        let blocks = parse_fenced_blocks("```package.json\n{}\n```");
        assert_eq!(blocks[0].filename(), Some("package.json"));
        assert_eq!(blocks[0].language(), None);
    }

    #[test]
    fn multiple_blocks_come_back_in_order() {
        let text = "```python\nimport a\n```\ntext\n```go\nimport \"fmt\"\n```";
        let blocks = parse_fenced_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language(), Some("python"));
        assert_eq!(blocks[1].language(), Some("go"));
    }

    #[test]
    fn unterminated_fence_is_kept() {
        let blocks = parse_fenced_blocks("```python\nimport requests");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code(), "import requests");
    }
}
