/// Object key layout of one vault inside the remote store:
///
/// ```text
/// {prefix}/chunks/{chunk id hex}
/// {prefix}/manifests/{snapshot id}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    prefix: String,
}

impl Layout {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn chunks_dir(&self) -> String {
        format!("{}/chunks", self.prefix)
    }

    pub fn chunk_key(&self, chunk_hex: &str) -> String {
        format!("{}/chunks/{chunk_hex}", self.prefix)
    }

    pub fn manifests_dir(&self) -> String {
        format!("{}/manifests", self.prefix)
    }

    pub fn manifest_key(&self, snapshot_id: &str) -> String {
        format!("{}/manifests/{snapshot_id}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        let layout = Layout::new("/work/");
        assert_eq!(layout.chunk_key("ab12"), "work/chunks/ab12");
        assert_eq!(layout.manifest_key("00000001-1"), "work/manifests/00000001-1");
        assert_eq!(layout.manifests_dir(), "work/manifests");
        assert_eq!(layout.chunks_dir(), "work/chunks");
    }
}
