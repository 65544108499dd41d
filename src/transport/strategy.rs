use derive_more::Display;

/// The transport only accepts writes of its fixed block size.
pub const BLOCK_SIZE: usize = 8;

/// How a frame is chunked into writes.
#[derive(Copy, Clone, Debug, Display, Eq, Hash, PartialEq)]
pub enum WriteStrategy {
    /// The whole frame in a single write.
    #[display("one-shot")]
    OneShot,

    /// The frame without its terminator, followed by the terminator padded with zeros to a block.
    #[display("split-terminator-padded")]
    SplitTerminatorPadded,

    /// The frame split into zero-padded blocks.
    #[display("fixed-block-chunked")]
    FixedBlockChunked,
}

impl WriteStrategy {
    pub const ALL: [Self; 3] = [Self::OneShot, Self::SplitTerminatorPadded, Self::FixedBlockChunked];

    /// Default attempt order, with the preferred strategy moved to the front.
    #[must_use]
    pub fn ordered(preferred: Option<Self>) -> Vec<Self> {
        let mut strategies = Self::ALL.to_vec();
        if let Some(preferred) = preferred {
            strategies.retain(|strategy| *strategy != preferred);
            strategies.insert(0, preferred);
        }
        strategies
    }

    /// Individual writes to issue for the frame.
    #[must_use]
    pub fn chunks(self, frame: &[u8]) -> Vec<Vec<u8>> {
        match self {
            Self::OneShot => vec![frame.to_vec()],
            Self::SplitTerminatorPadded => {
                let Some((terminator, body)) = frame.split_last() else {
                    return Vec::new();
                };
                let mut block = vec![0; BLOCK_SIZE];
                block[0] = *terminator;
                vec![body.to_vec(), block]
            }
            Self::FixedBlockChunked => frame
                .chunks(BLOCK_SIZE)
                .map(|chunk| {
                    let mut block = chunk.to_vec();
                    block.resize(BLOCK_SIZE, 0);
                    block
                })
                .collect(),
        }
    }
}
