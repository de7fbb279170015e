use common_error::SieveResult;
use serde::Deserialize;
use sieve_core::Sample;
use sieve_ops::{
    Mapper, OpContext, Operator, OperatorArgs, OperatorDescriptor, OperatorKind, ParamSchema,
    ParamSpec, ParamType,
};

pub const NAME: &str = "text_chunk_mapper";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextChunkConfig {
    max_len: usize,
    overlap_len: usize,
}

/// Splits each text into chunks of at most `max_len` characters, consecutive chunks
/// sharing `overlap_len` characters. Every chunk becomes its own sample carrying the
/// other fields of its source.
pub struct TextChunkMapper {
    text_key: String,
    config: TextChunkConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Mapper)
        .batched()
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("max_len", ParamType::Int).with_default(512i64),
            ParamSpec::new("overlap_len", ParamType::Int).with_default(0i64),
        ]))
        .with_docstring("Splits texts into fixed-size, optionally overlapping chunks.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    let config: TextChunkConfig = args.bind()?;
    common_error::ensure!(
        config.max_len > 0 && config.overlap_len < config.max_len,
        ValueError: "`{}` needs 0 <= overlap_len < max_len, got overlap_len={} max_len={}",
        NAME, config.overlap_len, config.max_len
    );
    Ok(Operator::mapper(TextChunkMapper {
        text_key: args.text_key().to_string(),
        config,
    }))
}

fn chunk(text: &str, max_len: usize, overlap_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return vec![text.to_string()];
    }
    let stride = max_len - overlap_len;
    let mut chunks = vec![];
    let mut start = 0;
    loop {
        let end = (start + max_len).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            return chunks;
        }
        start += stride;
    }
}

impl TextChunkMapper {
    fn chunks_of(&self, sample: &Sample) -> SieveResult<Vec<String>> {
        Ok(chunk(
            sample.get_str(&self.text_key)?,
            self.config.max_len,
            self.config.overlap_len,
        ))
    }

    fn expand(&self, sample: &Sample, chunks: Vec<String>, out: &mut Vec<Sample>) {
        out.extend(chunks.into_iter().map(|text| {
            let mut chunked = sample.clone();
            chunked.set(self.text_key.clone(), text);
            chunked
        }));
    }
}

impl Mapper for TextChunkMapper {
    fn process(&self, sample: Sample, _ctx: &mut OpContext<'_>) -> SieveResult<Vec<Sample>> {
        let chunks = self.chunks_of(&sample)?;
        let mut out = Vec::with_capacity(chunks.len());
        self.expand(&sample, chunks, &mut out);
        Ok(out)
    }

    /// Chunks the whole batch first, then sizes the output once.
    fn process_batched(
        &self,
        samples: Vec<Sample>,
        _ctx: &mut OpContext<'_>,
    ) -> SieveResult<Vec<Sample>> {
        let chunked = samples
            .iter()
            .map(|sample| self.chunks_of(sample))
            .collect::<SieveResult<Vec<_>>>()?;
        let mut out = Vec::with_capacity(chunked.iter().map(Vec::len).sum());
        for (sample, chunks) in samples.iter().zip(chunked) {
            self.expand(sample, chunks, &mut out);
        }
        Ok(out)
    }
}
