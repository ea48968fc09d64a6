//! Append-only gallery of structured templates keyed by id.

use crate::frame::FlatError;
use crate::gallery::{encode_gallery, FlattenedGallery};
use crate::types::{Template, TemplateId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("template id {0} already enrolled")]
    DuplicateId(TemplateId),
    #[error("template has no id; enroll it with one")]
    MissingTemplateId,
    #[error("malformed template data: {0}")]
    Flat(#[from] FlatError),
}

/// Append-only template storage.
pub trait GalleryStore {
    /// Store a template. It must carry an id not already present.
    fn append(&mut self, template: Template) -> Result<(), StoreError>;

    /// Every stored template, in enrollment order.
    fn templates(&self) -> &[Template];

    fn len(&self) -> usize {
        self.templates().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Gallery held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryGallery {
    templates: Vec<Template>,
    index: HashMap<TemplateId, usize>,
}

impl MemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TemplateId) -> Option<&Template> {
        self.index.get(&id).map(|&i| &self.templates[i])
    }
}

impl GalleryStore for MemoryGallery {
    fn append(&mut self, template: Template) -> Result<(), StoreError> {
        let id = template.id().ok_or(StoreError::MissingTemplateId)?;
        if self.index.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }
        self.index.insert(id, self.templates.len());
        self.templates.push(template);
        Ok(())
    }

    fn templates(&self) -> &[Template] {
        &self.templates
    }
}

/// Stamp `template` with `id` and append it to `store`.
pub fn enroll<S: GalleryStore + ?Sized>(
    mut template: Template,
    id: TemplateId,
    store: &mut S,
) -> Result<(), StoreError> {
    template.set_id(id);
    let fragments = template.len();
    store.append(template)?;
    tracing::info!(%id, fragments, size = store.len(), "template enrolled");
    Ok(())
}

pub fn gallery_size<S: GalleryStore + ?Sized>(store: &S) -> usize {
    store.len()
}

/// Flatten every stored template, keyed by its id.
pub fn flatten_gallery<S: GalleryStore + ?Sized>(
    store: &S,
    max_template_bytes: usize,
) -> Result<FlattenedGallery, StoreError> {
    let entries = store
        .templates()
        .iter()
        .map(|t| t.id().map(|id| (id, t)).ok_or(StoreError::MissingTemplateId))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encode_gallery(entries, max_template_bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::decode_gallery;
    use crate::types::Fragment;

    fn template(byte: u8) -> Template {
        Template::from_fragments(vec![Fragment::new(vec![byte; 4])])
    }

    #[test]
    fn test_enroll_and_size() {
        let mut gallery = MemoryGallery::new();
        enroll(template(1), TemplateId(10), &mut gallery).unwrap();
        enroll(template(2), TemplateId(20), &mut gallery).unwrap();
        assert_eq!(gallery_size(&gallery), 2);
        assert_eq!(gallery.get(TemplateId(20)).unwrap().id(), Some(TemplateId(20)));
        assert!(gallery.get(TemplateId(30)).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut gallery = MemoryGallery::new();
        enroll(template(1), TemplateId(10), &mut gallery).unwrap();
        assert_eq!(
            enroll(template(2), TemplateId(10), &mut gallery).unwrap_err(),
            StoreError::DuplicateId(TemplateId(10))
        );
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_append_requires_id() {
        let mut gallery = MemoryGallery::new();
        assert_eq!(
            gallery.append(template(1)).unwrap_err(),
            StoreError::MissingTemplateId
        );
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_flatten_gallery_in_enrollment_order() {
        let mut gallery = MemoryGallery::new();
        for (byte, id) in [(1u8, 30u64), (2, 10), (3, 20)] {
            enroll(template(byte), TemplateId(id), &mut gallery).unwrap();
        }
        let flat = flatten_gallery(&gallery, usize::MAX).unwrap();
        let ids: Vec<u64> = decode_gallery(flat.gallery.as_bytes())
            .unwrap()
            .iter()
            .map(|e| e.id.0)
            .collect();
        assert_eq!(ids, vec![30, 10, 20]);
    }
}
