use crate::Result;
use crate::progress::ProgressReporter;
use crate::record::FileRecord;
use crate::transfer::PieceTransfer;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Index into a [`FileTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Debug)]
pub struct FileNode {
    pub name: String,
    pub is_dir: bool,
    pub parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Path tree derived from a manifest's file list, arena-allocated so parent
/// links are plain indices. Rebuilt fresh for every restore session, never
/// persisted.
pub struct FileTree {
    nodes: Vec<FileNode>,
}

impl FileTree {
    /// Builds the tree from '/'-separated source paths. Every segment but
    /// the last becomes a directory; insertion by name is idempotent.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self {
            nodes: vec![FileNode {
                name: ".".to_string(),
                is_dir: true,
                parent: None,
                children: Vec::new(),
            }],
        };
        for path in paths {
            let segments: Vec<&str> = path
                .as_ref()
                .split('/')
                .filter(|s| !s.is_empty() && *s != ".")
                .collect();
            let mut current = tree.root();
            for (i, segment) in segments.iter().enumerate() {
                let is_dir = i + 1 < segments.len();
                current = tree.insert_child(current, segment, is_dir);
            }
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &FileNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    fn insert_child(&mut self, parent: NodeId, name: &str, is_dir: bool) -> NodeId {
        if let Some(&existing) = self.nodes[parent.0]
            .children
            .iter()
            .find(|&&c| self.nodes[c.0].name == name)
        {
            return existing;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(FileNode {
            name: name.to_string(),
            is_dir,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// '/'-separated path from the root (the root itself contributes
    /// nothing), matching manifest source paths.
    pub fn full_path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(node_id) = cursor {
            let node = self.node(node_id);
            if node.parent.is_some() {
                segments.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    /// File nodes of the subtree rooted at `id`, depth-first.
    pub fn subtree_files(&self, id: NodeId) -> Vec<NodeId> {
        let mut files = Vec::new();
        self.collect_files(id, &mut files);
        files
    }

    fn collect_files(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = self.node(id);
        if !node.is_dir {
            out.push(id);
            return;
        }
        for &child in &node.children {
            self.collect_files(child, out);
        }
    }

    /// Total reconstructed bytes of all descendant files with a record.
    pub fn subtree_size(&self, id: NodeId, files: &HashMap<String, FileRecord>) -> u64 {
        self.subtree_files(id)
            .iter()
            .filter_map(|&f| files.get(&self.full_path(f)))
            .map(|record| record.total_size)
            .sum()
    }
}

/// Drives single-file and whole-subtree restoration from a loaded
/// manifest. Menu rendering lives with the caller; this type only walks
/// the tree and moves bytes.
pub struct RestoreNavigator {
    transfer: PieceTransfer,
}

impl RestoreNavigator {
    pub fn new(transfer: PieceTransfer) -> Self {
        Self { transfer }
    }

    pub fn build_tree(files: &HashMap<String, FileRecord>) -> FileTree {
        FileTree::from_paths(files.keys())
    }

    /// Restores the single file at `node` under `dest_root`.
    pub async fn download_file(
        &self,
        files: &HashMap<String, FileRecord>,
        tree: &FileTree,
        node: NodeId,
        dest_root: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let path = tree.full_path(node);
        let Some(record) = files.get(&path) else {
            return Err(crate::Error::Other(format!(
                "no record for {path} in manifest"
            )));
        };
        progress.begin(record.total_size);
        self.transfer.download_file(record, dest_root, progress).await
    }

    /// Restores every descendant file of `node` depth-first against one
    /// shared progress total. Already-correct files are skipped by the
    /// transfer layer, so re-running after an interruption resumes.
    pub async fn download_subtree(
        &self,
        files: &HashMap<String, FileRecord>,
        tree: &FileTree,
        node: NodeId,
        dest_root: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let total = tree.subtree_size(node, files);
        progress.begin(total);
        let file_nodes = tree.subtree_files(node);
        info!(
            root = tree.full_path(node),
            files = file_nodes.len(),
            total,
            "restoring subtree"
        );
        for file_node in file_nodes {
            let path = tree.full_path(file_node);
            if let Some(record) = files.get(&path) {
                self.transfer.download_file(record, dest_root, progress).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PieceRecord;

    fn tree() -> FileTree {
        FileTree::from_paths(["a.txt", "b/c.txt", "b/d/e.txt", "b/d/f.txt"])
    }

    #[test]
    fn builds_directories_for_all_but_last_segment() {
        let t = tree();
        let root = t.root();
        assert_eq!(t.children(root).len(), 2);

        let names: Vec<&str> = t
            .children(root)
            .iter()
            .map(|&c| t.node(c).name.as_str())
            .collect();
        assert_eq!(names, vec!["a.txt", "b"]);

        let a = t.children(root)[0];
        let b = t.children(root)[1];
        assert!(!t.node(a).is_dir);
        assert!(t.node(b).is_dir);

        let d = t.children(b)[1];
        assert!(t.node(d).is_dir);
        assert_eq!(t.children(d).len(), 2);
    }

    #[test]
    fn insertion_is_idempotent() {
        let t = FileTree::from_paths(["b/c.txt", "b/c.txt", "b/x.txt"]);
        let b = t.children(t.root())[0];
        assert_eq!(t.children(b).len(), 2);
    }

    #[test]
    fn full_path_round_trips_source_paths() {
        let t = tree();
        let all: Vec<String> = t
            .subtree_files(t.root())
            .iter()
            .map(|&f| t.full_path(f))
            .collect();
        assert_eq!(all, vec!["a.txt", "b/c.txt", "b/d/e.txt", "b/d/f.txt"]);
    }

    #[test]
    fn leading_dot_segments_are_dropped() {
        let t = FileTree::from_paths(["./b/c.txt"]);
        let b = t.children(t.root())[0];
        assert_eq!(t.node(b).name, "b");
        assert_eq!(t.full_path(t.children(b)[0]), "b/c.txt");
    }

    #[test]
    fn subtree_size_sums_descendant_records() {
        let t = tree();
        let mut files = HashMap::new();
        for (path, size) in [
            ("a.txt", 10u64),
            ("b/c.txt", 20),
            ("b/d/e.txt", 30),
            ("b/d/f.txt", 40),
        ] {
            files.insert(
                path.to_string(),
                FileRecord {
                    source: path.to_string(),
                    digest: "d".into(),
                    total_size: size,
                    uploaded: 0.0,
                    pieces: vec![PieceRecord {
                        id: "p".into(),
                        size: size + 32,
                    }],
                },
            );
        }
        assert_eq!(t.subtree_size(t.root(), &files), 100);
        let b = t.children(t.root())[1];
        assert_eq!(t.subtree_size(b, &files), 90);
        let d = t.children(b)[1];
        assert_eq!(t.subtree_size(d, &files), 70);
    }
}
