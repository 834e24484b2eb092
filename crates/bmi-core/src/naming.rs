//! Storage volume naming.
//!
//! The volume backing an image is never stored anywhere: it is always
//! `<uid>img<id>`, where `uid` identifies this BMI deployment on the shared
//! storage cluster. This derivation is the only link between an image row and
//! its volume, so it must stay stable across releases.

use bmi_provider::ImageId;

const IMAGE_MARKER: &str = "img";

/// Snapshot name used for every clone source managed by BMI.
pub const DEFAULT_SNAPSHOT: &str = "snapshot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeNaming {
    uid: String,
}

impl VolumeNaming {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn volume_name(&self, id: ImageId) -> String {
        format!("{}{IMAGE_MARKER}{id}", self.uid)
    }

    /// Recover the image id from a volume name produced by [`Self::volume_name`].
    pub fn image_id(&self, volume: &str) -> Option<ImageId> {
        volume
            .strip_prefix(self.uid.as_str())?
            .strip_prefix(IMAGE_MARKER)?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_name_is_deterministic() {
        let naming = VolumeNaming::new("bmi7");
        assert_eq!(naming.volume_name(42), "bmi7img42");
        assert_eq!(naming.volume_name(42), naming.volume_name(42));
    }

    #[test]
    fn image_id_inverts_volume_name() {
        let naming = VolumeNaming::new("5");
        for id in [0, 1, 17, 9_000_001] {
            assert_eq!(naming.image_id(&naming.volume_name(id)), Some(id));
        }
    }

    #[test]
    fn foreign_names_are_rejected() {
        let naming = VolumeNaming::new("bmi7");
        assert_eq!(naming.image_id("otherimg3"), None);
        assert_eq!(naming.image_id("bmi7img"), None);
        assert_eq!(naming.image_id("bmi7imgabc"), None);
        assert_eq!(naming.image_id("bmi7snap3"), None);
    }
}
