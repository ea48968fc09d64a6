//! Flat gallery codec.
//!
//! Layout, repeated until end of buffer:
//! ```text
//! | id: u64 | len: u64 | flat template: len bytes |
//! ```
//! Each entry body must itself decode as a flat template.

use crate::frame::{encode_frame, FlatError, FrameCursor, FRAME_PREFIX_LEN};
use crate::template::{encode_template, FlatTemplateRef};
use crate::types::{Template, TemplateId};
use std::iter::FusedIterator;

/// Bytes preceding each entry body: id + length.
pub const ENTRY_HEADER_LEN: usize = 2 * FRAME_PREFIX_LEN;

/// Owned flat gallery buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatGallery(Vec<u8>);

impl FlatGallery {
    /// Take ownership of `bytes` after checking every entry decodes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FlatError> {
        FlatGalleryRef::new(&bytes).validate()?;
        Ok(Self(bytes))
    }

    pub fn view(&self) -> FlatGalleryRef<'_> {
        FlatGalleryRef(&self.0)
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

/// Borrowed view of a flat gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatGalleryRef<'a>(&'a [u8]);

impl<'a> FlatGalleryRef<'a> {
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

    /// Iterate entries from the start of the buffer.
    pub fn entries(&self) -> Entries<'a> {
        Entries {
            cursor: FrameCursor::new(self.0),
            failed: false,
        }
    }

    /// Walk every entry, returning the entry count.
    pub fn validate(&self) -> Result<usize, FlatError> {
        self.entries().try_fold(0, |count, entry| entry.map(|_| count + 1))
    }
}

/// One decoded gallery entry, borrowing from the gallery buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GalleryEntry<'a> {
    pub id: TemplateId,
    pub template: FlatTemplateRef<'a>,
}

/// Entries of a flat gallery. Yields `Err` once on a framing error, then stops.
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    cursor: FrameCursor<'a>,
    failed: bool,
}

impl<'a> Entries<'a> {
    fn read_entry(&mut self) -> Result<GalleryEntry<'a>, FlatError> {
        let id = TemplateId(self.cursor.read_u64()?);
        let body = self.cursor.decode_frame()?;
        let base = self.cursor.position() - body.len();
        let template = FlatTemplateRef::new(body);
        template.validate().map_err(|e| e.offset_by(base))?;
        Ok(GalleryEntry { id, template })
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<GalleryEntry<'a>, FlatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.is_exhausted() {
            return None;
        }
        let entry = self.read_entry();
        self.failed = entry.is_err();
        Some(entry)
    }
}

impl FusedIterator for Entries<'_> {}

/// Appends entries to a flat gallery buffer.
#[derive(Debug, Default)]
pub struct FlatGalleryBuilder {
    buf: Vec<u8>,
    entries: usize,
}

impl FlatGalleryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already-flattened template, rejecting bodies that do not decode.
    pub fn push(&mut self, id: TemplateId, template: FlatTemplateRef<'_>) -> Result<(), FlatError> {
        template.validate()?;
        self.append(id, template.as_bytes());
        Ok(())
    }

    fn append(&mut self, id: TemplateId, body: &[u8]) {
        self.buf.extend_from_slice(&id.0.to_ne_bytes());
        encode_frame(body, &mut self.buf);
        self.entries += 1;
    }

    /// Entries appended so far.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn finish(self) -> FlatGallery {
        FlatGallery(self.buf)
    }
}

/// Outcome of flattening a gallery.
#[derive(Debug, Clone)]
pub struct FlattenedGallery {
    pub gallery: FlatGallery,
    pub entries: usize,
    /// Entries whose template hit the size cap and lost fragments.
    pub incomplete: Vec<TemplateId>,
}

impl FlattenedGallery {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

/// Encode `(id, template)` pairs in order. Each template gets its own
/// `max_template_bytes` budget.
pub fn encode_gallery<'t, I>(
    templates: I,
    max_template_bytes: usize,
) -> Result<FlattenedGallery, FlatError>
where
    I: IntoIterator<Item = (TemplateId, &'t Template)>,
{
    let mut builder = FlatGalleryBuilder::new();
    let mut incomplete = Vec::new();

    for (id, template) in templates {
        let flattened = encode_template(template, max_template_bytes)?;
        if !flattened.is_complete() {
            tracing::warn!(%id, dropped = flattened.dropped, "gallery entry truncated at size cap");
            incomplete.push(id);
        }
        builder.append(id, flattened.template.as_bytes());
    }

    let entries = builder.len();
    let gallery = builder.finish();
    tracing::debug!(entries, bytes = gallery.len(), "gallery flattened");
    Ok(FlattenedGallery {
        gallery,
        entries,
        incomplete,
    })
}

/// Decode every entry of a flat gallery buffer.
pub fn decode_gallery(bytes: &[u8]) -> Result<Vec<GalleryEntry<'_>>, FlatError> {
    FlatGalleryRef::new(bytes).entries().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{decode_template, flatten_template};
    use crate::types::Fragment;

    fn template(fragments: &[&[u8]]) -> Template {
        Template::from_fragments(fragments.iter().map(|f| Fragment::new(*f)).collect())
    }

    #[test]
    fn test_gallery_roundtrip() {
        let a = template(&[b"alpha", b"beta"]);
        let empty = Template::new();
        let c = template(&[b"gamma"]);
        let flat = encode_gallery(
            [(TemplateId(7), &a), (TemplateId(3), &empty), (TemplateId(42), &c)],
            usize::MAX,
        )
        .unwrap();
        assert_eq!(flat.entries, 3);
        assert!(flat.is_complete());

        let entries = decode_gallery(flat.gallery.as_bytes()).unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![TemplateId(7), TemplateId(3), TemplateId(42)]);
        assert_eq!(
            decode_template(entries[0].template.as_bytes()).unwrap(),
            vec![&b"alpha"[..], &b"beta"[..]]
        );
        assert!(entries[1].template.is_empty());
        assert_eq!(
            entries[2].template.as_bytes(),
            flatten_template(&c).unwrap().template.as_bytes()
        );
    }

    #[test]
    fn test_entry_layout() {
        let flat = encode_gallery([(TemplateId(9), &template(&[b"xy"]))], usize::MAX).unwrap();
        let bytes = flat.gallery.as_bytes();
        assert_eq!(&bytes[..8], &9u64.to_ne_bytes());
        assert_eq!(&bytes[8..16], &10u64.to_ne_bytes());
        assert_eq!(bytes.len(), ENTRY_HEADER_LEN + 10);
    }

    #[test]
    fn test_truncated_last_entry() {
        let a = template(&[b"alpha"]);
        let b = template(&[b"beta"]);
        let flat = encode_gallery([(TemplateId(1), &a), (TemplateId(2), &b)], usize::MAX).unwrap();
        let bytes = flat.gallery.as_bytes();
        let cut = &bytes[..bytes.len() - 2];

        assert!(matches!(decode_gallery(cut), Err(FlatError::Truncated { .. })));

        // The intact first entry is still yielded before the error.
        let mut entries = FlatGalleryRef::new(cut).entries();
        assert_eq!(entries.next().unwrap().unwrap().id, TemplateId(1));
        assert!(entries.next().unwrap().is_err());
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_truncated_entry_header() {
        let flat = encode_gallery([(TemplateId(1), &template(&[b"a"]))], usize::MAX).unwrap();
        let mut bytes = flat.gallery.into_bytes();
        bytes.extend_from_slice(&[0xFF; 5]);
        assert!(matches!(
            decode_gallery(&bytes),
            Err(FlatError::Truncated { needed: 8, remaining: 5, .. })
        ));
    }

    #[test]
    fn test_inner_frame_overrun_is_framing_error() {
        // Entry body claims 12 bytes; inside it a frame claims 100.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5u64.to_ne_bytes());
        bytes.extend_from_slice(&12u64.to_ne_bytes());
        bytes.extend_from_slice(&100u64.to_ne_bytes());
        bytes.extend_from_slice(&[0; 4]);
        assert_eq!(
            decode_gallery(&bytes).unwrap_err(),
            FlatError::Truncated { offset: 24, needed: 100, remaining: 4 }
        );
    }

    #[test]
    fn test_builder_rejects_invalid_template() {
        let mut builder = FlatGalleryBuilder::new();
        let bogus = 3u64.to_ne_bytes();
        assert!(builder.push(TemplateId(1), FlatTemplateRef::new(&bogus[..4])).is_err());
        assert!(builder.is_empty());

        let ok = flatten_template(&template(&[b"ok"])).unwrap();
        builder.push(TemplateId(2), ok.template.view()).unwrap();
        let gallery = builder.finish();
        assert_eq!(gallery.view().validate().unwrap(), 1);
    }

    #[test]
    fn test_per_entry_budget() {
        let small = template(&[&[1; 8]]);
        let big = template(&[&[2; 8], &[3; 64]]);
        let flat = encode_gallery(
            [(TemplateId(1), &small), (TemplateId(2), &big), (TemplateId(3), &small)],
            40,
        )
        .unwrap();
        // The budget applies per entry, so the third entry is unaffected.
        assert_eq!(flat.incomplete, vec![TemplateId(2)]);
        let entries = decode_gallery(flat.gallery.as_bytes()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].template.validate().unwrap(), 1);
        assert_eq!(entries[2].template.validate().unwrap(), 1);
    }

    #[test]
    fn test_empty_gallery() {
        assert!(decode_gallery(&[]).unwrap().is_empty());
        let flat = encode_gallery(std::iter::empty(), usize::MAX).unwrap();
        assert!(flat.gallery.is_empty());
    }

    #[test]
    fn test_entries_restartable() {
        let flat = encode_gallery([(TemplateId(1), &template(&[b"a"]))], usize::MAX).unwrap();
        let view = flat.gallery.view();
        assert_eq!(view.entries().count(), 1);
        assert_eq!(view.entries().count(), 1);
    }
}
