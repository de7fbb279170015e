use common_error::SieveResult;
use sieve_core::Sample;
use sieve_ops::{Mapper, OpContext, Operator, OperatorArgs, OperatorDescriptor, OperatorKind};

pub const NAME: &str = "whitespace_normalization_mapper";

/// Replaces every non-newline whitespace character (tabs, no-break and other unicode
/// spaces) with a plain space and trims the text.
pub struct WhitespaceNormalizationMapper {
    text_key: String,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Mapper)
        .with_docstring("Normalizes unicode whitespace to plain spaces and trims the text.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    Ok(Operator::mapper(WhitespaceNormalizationMapper {
        text_key: args.text_key().to_string(),
    }))
}

fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_whitespace() && c != '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

impl Mapper for WhitespaceNormalizationMapper {
    fn process(&self, mut sample: Sample, _ctx: &mut OpContext<'_>) -> SieveResult<Vec<Sample>> {
        let normalized = normalize(sample.get_str(&self.text_key)?);
        sample.set(self.text_key.clone(), normalized);
        Ok(vec![sample])
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn normalizes_unicode_spaces() {
        assert_eq!(super::normalize("\u{a0}a\tb\u{2003}c\nd  "), "a b c\nd");
    }
}
