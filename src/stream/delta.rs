/// The generation source broke its append-only contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamIntegrityError {
    #[error(
        "cumulative text is not a prefix extension of the previous step \
         (previous {previous_len} bytes, current {current_len} bytes)"
    )]
    NotPrefixExtension {
        previous_len: usize,
        current_len: usize,
    },
    #[error("generation step received after the terminal step")]
    StepAfterTerminal,
}

/// Text `current` adds on top of `previous`.
///
/// # Errors
///
/// Returns [`StreamIntegrityError::NotPrefixExtension`] when `current` does not
/// start with `previous`.
pub fn extract<'a>(previous: &str, current: &'a str) -> Result<&'a str, StreamIntegrityError> {
    current
        .strip_prefix(previous)
        .ok_or(StreamIntegrityError::NotPrefixExtension {
            previous_len: previous.len(),
            current_len: current.len(),
        })
}

/// Stateful [`extract`] over the steps of one request.
#[derive(Debug, Default, Clone)]
pub struct DeltaExtractor {
    text: String,
}

impl DeltaExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the next cumulative text and return what it added.
    ///
    /// On error the extractor keeps its previous text.
    ///
    /// # Errors
    ///
    /// Returns [`StreamIntegrityError::NotPrefixExtension`] when `current`
    /// rewrites or truncates text already seen.
    pub fn advance(&mut self, current: &str) -> Result<String, StreamIntegrityError> {
        let delta = extract(&self.text, current)?.to_owned();
        self.text.push_str(&delta);
        Ok(delta)
    }

    /// Cumulative text seen so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}
