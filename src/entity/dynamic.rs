use std::collections::{BTreeMap, BTreeSet};

use crate::assets::decode::Bitmap;
use crate::foundation::fingerprint::{Fingerprint, StableHasher};

/// Per-player overrides applied at render time.
///
/// Hidden sprites are skipped; replacement images are drawn instead of the entity's own bitmap
/// for the same image key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicEntity {
    hidden: BTreeSet<String>,
    images: BTreeMap<String, Bitmap>,
}

impl DynamicEntity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hidden(&mut self, image_key: impl Into<String>, hidden: bool) {
        let key = image_key.into();
        if hidden {
            self.hidden.insert(key);
        } else {
            self.hidden.remove(&key);
        }
    }

    pub fn set_image(&mut self, image_key: impl Into<String>, bitmap: Bitmap) {
        self.images.insert(image_key.into(), bitmap);
    }

    pub fn remove_image(&mut self, image_key: &str) -> Option<Bitmap> {
        self.images.remove(image_key)
    }

    pub fn clear(&mut self) {
        self.hidden.clear();
        self.images.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.hidden.is_empty() && self.images.is_empty()
    }

    pub fn is_hidden(&self, image_key: &str) -> bool {
        self.hidden.contains(image_key)
    }

    pub fn image(&self, image_key: &str) -> Option<&Bitmap> {
        self.images.get(image_key)
    }

    /// Render-cache discriminator. Zero for an empty override set, so plain renders share keys.
    pub fn fingerprint(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let mut h = StableHasher::new();
        h.write_u64(self.hidden.len() as u64);
        for key in &self.hidden {
            h.write_str(key);
        }
        h.write_u64(self.images.len() as u64);
        for (key, bitmap) in &self.images {
            h.write_str(key);
            h.write_u32(bitmap.width);
            h.write_u32(bitmap.height);
            h.write_bytes(&bitmap.rgba8_premul);
        }
        let fp: Fingerprint = h.finish();
        fp.fold64().max(1)
    }
}
