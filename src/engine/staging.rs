// src/engine/staging.rs
//
// Per-form image collections: persisted references (URLs) plus newly staged
// artifacts, capped together at `max_images`. Persisted images marked for
// removal free their slot at once, so a full form can stage a replacement.

use crate::engine::compress::CompressedArtifact;
use crate::error::IntakeError;
use tracing::debug;

bitflags::bitflags! {
    /// Acquisition entry points a form may currently offer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AcquisitionControls: u8 {
        const FILE_PICK = 0b0000_0001;
        const CAMERA    = 0b0000_0010;
    }
}

/// Receives staged-collection updates.
pub trait ImageChangeListener {
    /// Called with the whole staged collection after every append or removal.
    fn on_images_change(&mut self, staged: &[CompressedArtifact]);

    /// A persisted image was marked for removal. It no longer counts toward
    /// `max_images`, but the form still owns deleting it on save.
    fn on_remove_existing(&mut self, _index: usize) {}
}

#[derive(Clone, Debug)]
struct ExistingImage {
    url: String,
    marked_for_removal: bool,
}

#[derive(Clone, Debug)]
pub struct StagedImages {
    existing: Vec<ExistingImage>,
    staged: Vec<CompressedArtifact>,
    max_images: usize,
}

impl StagedImages {
    pub fn new(max_images: usize) -> Self {
        Self::with_existing(Vec::<String>::new(), max_images)
    }

    pub fn with_existing<I, S>(urls: I, max_images: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            existing: urls
                .into_iter()
                .map(|url| ExistingImage {
                    url: url.into(),
                    marked_for_removal: false,
                })
                .collect(),
            staged: Vec::new(),
            max_images,
        }
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    /// Persisted images that are kept, plus staged ones.
    pub fn total(&self) -> usize {
        let kept = self.existing.iter().filter(|e| !e.marked_for_removal).count();
        kept + self.staged.len()
    }

    pub fn staged(&self) -> &[CompressedArtifact] {
        &self.staged
    }

    pub fn existing_urls(&self) -> impl Iterator<Item = &str> {
        self.existing.iter().map(|e| e.url.as_str())
    }

    pub fn can_acquire(&self) -> bool {
        self.total() < self.max_images
    }

    pub fn enabled_controls(&self) -> AcquisitionControls {
        if self.can_acquire() {
            AcquisitionControls::all()
        } else {
            AcquisitionControls::empty()
        }
    }

    pub fn ensure_capacity(&self) -> Result<(), IntakeError> {
        if self.can_acquire() {
            Ok(())
        } else {
            Err(IntakeError::staging_full(self.total(), self.max_images))
        }
    }

    /// Stage a new artifact. Rejected, with nothing changed, when full.
    pub fn append(
        &mut self,
        artifact: CompressedArtifact,
        listener: Option<&mut dyn ImageChangeListener>,
    ) -> Result<(), IntakeError> {
        self.ensure_capacity()?;
        debug!(
            target: "photo_intake::session",
            filename = artifact.filename(),
            staged = self.staged.len() + 1,
            "artifact staged"
        );
        self.staged.push(artifact);
        if let Some(listener) = listener {
            listener.on_images_change(&self.staged);
        }
        Ok(())
    }

    /// Discard a staged artifact permanently.
    pub fn remove_staged(
        &mut self,
        index: usize,
        listener: Option<&mut dyn ImageChangeListener>,
    ) -> Result<CompressedArtifact, IntakeError> {
        if index >= self.staged.len() {
            return Err(IntakeError::staged_index_out_of_range(index, self.staged.len()));
        }
        let removed = self.staged.remove(index);
        if let Some(listener) = listener {
            listener.on_images_change(&self.staged);
        }
        Ok(removed)
    }

    /// Mark a persisted image for removal on the next save.
    pub fn remove_existing(
        &mut self,
        index: usize,
        listener: Option<&mut dyn ImageChangeListener>,
    ) -> Result<(), IntakeError> {
        let len = self.existing.len();
        let entry = self
            .existing
            .get_mut(index)
            .ok_or_else(|| IntakeError::staged_index_out_of_range(index, len))?;
        entry.marked_for_removal = true;
        if let Some(listener) = listener {
            listener.on_remove_existing(index);
        }
        Ok(())
    }

    pub fn pending_removals(&self) -> Vec<&str> {
        self.existing
            .iter()
            .filter(|e| e.marked_for_removal)
            .map(|e| e.url.as_str())
            .collect()
    }

    /// The form saved: drop marked persisted images, returning their URLs.
    pub fn commit_removals(&mut self) -> Vec<String> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.existing)
            .into_iter()
            .partition(|e| e.marked_for_removal);
        self.existing = kept;
        removed.into_iter().map(|e| e.url).collect()
    }
}
