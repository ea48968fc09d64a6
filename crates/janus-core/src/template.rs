//! Flat template codec.
//!
//! A flat template is a run of frames, one per non-empty fragment, with no
//! count or terminator: the end of the buffer ends the template. The encoded
//! size never exceeds [`MAX_TEMPLATE_SIZE`].

use crate::frame::{encode_frame, frame_len, FlatError, FrameCursor};
use crate::types::{Fragment, Template};
use std::iter::FusedIterator;

/// Upper bound on an encoded template, in bytes (32 MiB).
pub const MAX_TEMPLATE_SIZE: usize = 33_554_432;

pub fn max_template_size() -> usize {
    MAX_TEMPLATE_SIZE
}

/// Owned flat template buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatTemplate(Vec<u8>);

impl FlatTemplate {
    /// Take ownership of `bytes` after checking every frame is in bounds.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FlatError> {
        FlatTemplateRef::new(&bytes).validate()?;
        Ok(Self(bytes))
    }

    pub fn view(&self) -> FlatTemplateRef<'_> {
        FlatTemplateRef(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Borrowed view of a flat template. Framing is checked lazily while iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatTemplateRef<'a>(&'a [u8]);

impl<'a> FlatTemplateRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate fragment payloads from the start of the buffer.
    pub fn fragments(&self) -> Fragments<'a> {
        Fragments {
            cursor: FrameCursor::new(self.0),
            failed: false,
        }
    }

    /// Walk every frame, returning the fragment count.
    pub fn validate(&self) -> Result<usize, FlatError> {
        self.fragments().try_fold(0, |count, frame| frame.map(|_| count + 1))
    }

    /// Copy the fragments back into a structured template.
    pub fn to_template(&self) -> Result<Template, FlatError> {
        let fragments = self
            .fragments()
            .map(|frame| frame.map(Fragment::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Template::from_fragments(fragments))
    }
}

/// Fragment payloads of a flat template.
///
/// Yields `Err` once on a framing error, then stops.
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    cursor: FrameCursor<'a>,
    failed: bool,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Result<&'a [u8], FlatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.is_exhausted() {
            return None;
        }
        let frame = self.cursor.decode_frame();
        self.failed = frame.is_err();
        Some(frame)
    }
}

impl FusedIterator for Fragments<'_> {}

/// Outcome of flattening a template.
#[derive(Debug, Clone)]
pub struct Flattened {
    pub template: FlatTemplate,
    /// Fragments emitted.
    pub written: usize,
    /// Non-empty fragments left out because the size cap was reached.
    pub dropped: usize,
}

impl Flattened {
    /// False when the size cap cut the encoding short.
    pub fn is_complete(&self) -> bool {
        self.dropped == 0
    }
}

/// Encode `template`, emitting whole frames while they fit in `max_bytes`
/// (itself capped at [`MAX_TEMPLATE_SIZE`]).
///
/// Empty fragments are skipped. Encoding stops at the first fragment that
/// does not fit; that and all later non-empty fragments are counted in
/// [`Flattened::dropped`].
pub fn encode_template(template: &Template, max_bytes: usize) -> Result<Flattened, FlatError> {
    let budget = max_bytes.min(MAX_TEMPLATE_SIZE);
    let mut out = Vec::new();
    let mut written = 0;

    let mut fragments = template.fragments().iter().enumerate();
    while let Some((index, fragment)) = fragments.next() {
        if fragment.is_empty() {
            continue;
        }
        let payload = fragment
            .as_contiguous()
            .ok_or(FlatError::NonContiguous { index })?;

        if out.len().saturating_add(frame_len(payload.len())) > budget {
            let dropped = 1 + fragments.filter(|(_, f)| !f.is_empty()).count();
            tracing::warn!(
                written,
                dropped,
                bytes = out.len(),
                budget,
                "template size cap reached; remaining fragments dropped"
            );
            return Ok(Flattened {
                template: FlatTemplate(out),
                written,
                dropped,
            });
        }

        encode_frame(payload, &mut out);
        written += 1;
    }

    tracing::debug!(written, bytes = out.len(), "template flattened");
    Ok(Flattened {
        template: FlatTemplate(out),
        written,
        dropped: 0,
    })
}

/// Encode `template` against the fixed [`MAX_TEMPLATE_SIZE`] cap.
pub fn flatten_template(template: &Template) -> Result<Flattened, FlatError> {
    encode_template(template, MAX_TEMPLATE_SIZE)
}

/// Decode every fragment payload of a flat template buffer.
pub fn decode_template(bytes: &[u8]) -> Result<Vec<&[u8]>, FlatError> {
    FlatTemplateRef::new(bytes).fragments().collect()
}
