//! Fill-in-the-middle marker handling. Completion prompts that carry FIM
//! markers are routed and inspected as FIM requests but the prompt itself
//! travels to the upstream untouched, the markers are the model's protocol.

/// The marker dialects we recognize. Each is (prefix, suffix, middle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FimDialect {
    /// qwen / starcoder style
    StarCoder,
    /// deepseek-coder style
    DeepSeek,
    /// codellama infill style
    CodeLlama,
}

impl FimDialect {
    pub fn markers(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            FimDialect::StarCoder => ("<|fim_prefix|>", "<|fim_suffix|>", "<|fim_middle|>"),
            FimDialect::DeepSeek => ("<｜fim▁begin｜>", "<｜fim▁hole｜>", "<｜fim▁end｜>"),
            FimDialect::CodeLlama => ("<PRE>", "<SUF>", "<MID>"),
        }
    }

    pub fn all() -> &'static [FimDialect] {
        &[
            FimDialect::StarCoder,
            FimDialect::DeepSeek,
            FimDialect::CodeLlama,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FimParts {
    prefix: String,
    suffix: String,
    dialect: FimDialect,
}

impl FimParts {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn dialect(&self) -> FimDialect {
        self.dialect
    }

    /// Reassembles the prompt in the dialect's wire order.
    pub fn to_prompt(&self) -> String {
        let (pre, suf, mid) = self.dialect.markers();
        format!("{}{}{}{}{}", pre, self.prefix, suf, self.suffix, mid)
    }
}

pub fn contains_fim_markers(prompt: &str) -> bool {
    FimDialect::all().iter().any(|dialect| {
        let (pre, suf, _) = dialect.markers();
        prompt.contains(pre) && prompt.contains(suf)
    })
}

/// Splits a marked prompt into its prefix and suffix. Returns None when no
/// dialect matches, the caller then treats the prompt as a plain completion.
pub fn split(prompt: &str) -> Option<FimParts> {
    for dialect in FimDialect::all() {
        let (pre, suf, mid) = dialect.markers();
        let after_pre = match prompt.split_once(pre) {
            Some((_, rest)) => rest,
            None => continue,
        };
        let (prefix, rest) = match after_pre.split_once(suf) {
            Some(parts) => parts,
            None => continue,
        };
        let suffix = rest.split_once(mid).map(|(s, _)| s).unwrap_or(rest);
        return Some(FimParts {
            prefix: prefix.to_owned(),
            suffix: suffix.to_owned(),
            dialect: *dialect,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starcoder_prompt_splits_and_rejoins() {
        let prompt = "<|fim_prefix|>fn main() {\n<|fim_suffix|>\n}<|fim_middle|>";
        let parts = split(prompt).expect("markers recognized");
        assert_eq!(parts.prefix(), "fn main() {\n");
        assert_eq!(parts.suffix(), "\n}");
        assert_eq!(parts.to_prompt(), prompt);
    }

    #[test]
    fn deepseek_markers_are_recognized() {
        let prompt = "<｜fim▁begin｜>a<｜fim▁hole｜>b<｜fim▁end｜>";
        assert!(contains_fim_markers(prompt));
        let parts = split(prompt).expect("markers recognized");
        assert_eq!(parts.dialect(), FimDialect::DeepSeek);
    }

    #[test]
    fn plain_prompt_is_not_fim() {
        assert!(!contains_fim_markers("write me a parser"));
        assert!(split("write me a parser").is_none());
    }
}
