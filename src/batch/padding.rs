/// Which end of a row receives padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingSide {
    /// GLM tokenizers pad on the left so generation continues from the prompt end.
    #[default]
    Left,
    Right,
}

/// Token rows aligned to a common width, with attention masks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u8>>,
    width: usize,
}

impl PaddedBatch {
    /// Length every row was padded to.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Pad every row to the length of the longest one.
#[must_use]
pub fn pad_longest(rows: Vec<Vec<u32>>, pad_token_id: u32, side: PaddingSide) -> PaddedBatch {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut input_ids = Vec::with_capacity(rows.len());
    let mut attention_mask = Vec::with_capacity(rows.len());

    for row in rows {
        let pad = width - row.len();
        let mut ids = Vec::with_capacity(width);
        let mut mask = Vec::with_capacity(width);
        match side {
            PaddingSide::Left => {
                ids.resize(pad, pad_token_id);
                mask.resize(pad, 0);
                mask.resize(width, 1);
                ids.extend(row);
            }
            PaddingSide::Right => {
                mask.resize(row.len(), 1);
                mask.resize(width, 0);
                ids.extend(row);
                ids.resize(width, pad_token_id);
            }
        }
        input_ids.push(ids);
        attention_mask.push(mask);
    }

    PaddedBatch {
        input_ids,
        attention_mask,
        width,
    }
}
