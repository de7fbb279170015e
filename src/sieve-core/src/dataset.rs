use common_error::SieveResult;

use crate::Sample;

/// An ordered, in-memory batch of samples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a dataset from JSON objects, splitting out each row's stats.
    pub fn from_values(values: impl IntoIterator<Item = serde_json::Value>) -> SieveResult<Self> {
        let samples = values
            .into_iter()
            .map(Sample::from_value)
            .collect::<SieveResult<Vec<_>>>()?;
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Splits into at most `num_shards` contiguous, non-empty shards whose sizes
    /// differ by at most one. An empty dataset yields no shards.
    pub fn shard(self, num_shards: usize) -> Vec<Vec<Sample>> {
        let len = self.samples.len();
        let num_shards = num_shards.clamp(1, len.max(1));
        if len == 0 {
            return vec![];
        }
        let base = len / num_shards;
        let extra = len % num_shards;

        let mut shards = Vec::with_capacity(num_shards);
        let mut rest = self.samples;
        for i in (0..num_shards).rev() {
            let size = base + usize::from(i < extra);
            let tail = rest.split_off(rest.len() - size);
            shards.push(tail);
        }
        shards.reverse();
        shards
    }

    /// Concatenates shards back together in the order given.
    pub fn reassemble(shards: impl IntoIterator<Item = Vec<Sample>>) -> Self {
        Self {
            samples: shards.into_iter().flatten().collect(),
        }
    }
}

impl From<Vec<Sample>> for Dataset {
    fn from(samples: Vec<Sample>) -> Self {
        Self::new(samples)
    }
}

impl FromIterator<Sample> for Dataset {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Dataset {
    type Item = Sample;
    type IntoIter = std::vec::IntoIter<Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
