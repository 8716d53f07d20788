//! Inode table behind the loopback server.
//!
//! Nodes are keyed by inode number; directories keep their children in
//! creation order so listings come back in a stable, unsorted order.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use virtfs_wire::ROOT_ID;
use virtfs_wire::abi::{Attr, S_IFDIR, S_IFMT, S_IFREG};

use super::errno::{EEXIST, EINVAL, EISDIR, ENOENT, ENOTDIR, ENOTEMPTY, EPERM};

pub(crate) type Errno = i32;

#[derive(Debug, Clone)]
pub(crate) enum Content {
    File(Vec<u8>),
    Directory(Vec<u64>),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub parent: u64,
    pub name: String,
    pub attr: Attr,
    pub content: Content,
}

impl Node {
    fn data(&self) -> Result<&[u8], Errno> {
        match &self.content {
            Content::File(data) => Ok(data),
            Content::Directory(_) => Err(EISDIR),
        }
    }
}

fn now() -> (u64, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs(), now.subsec_nanos())
}

fn touch(attr: &mut Attr, modified: bool) {
    let (secs, nsecs) = now();
    attr.ctime = secs;
    attr.ctimensec = nsecs;
    if modified {
        attr.mtime = secs;
        attr.mtimensec = nsecs;
    }
}

fn sync_size(node: &mut Node) {
    if let Content::File(data) = &node.content {
        node.attr.size = data.len() as u64;
        node.attr.blocks = node.attr.size.div_ceil(512);
    }
}

#[derive(Debug)]
pub(crate) struct MemoryTree {
    nodes: HashMap<u64, Node>,
    next_ino: u64,
}

impl MemoryTree {
    pub fn new(root_uid: u32, root_gid: u32) -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            next_ino: ROOT_ID + 1,
        };
        let attr = Self::new_attr(ROOT_ID, S_IFDIR | 0o755, root_uid, root_gid);
        tree.nodes.insert(
            ROOT_ID,
            Node {
                parent: ROOT_ID,
                name: String::new(),
                attr,
                content: Content::Directory(Vec::new()),
            },
        );
        tree
    }

    fn new_attr(ino: u64, mode: u32, uid: u32, gid: u32) -> Attr {
        let (secs, nsecs) = now();
        Attr {
            ino,
            mode,
            nlink: if mode & S_IFMT == S_IFDIR { 2 } else { 1 },
            uid,
            gid,
            atime: secs,
            mtime: secs,
            ctime: secs,
            atimensec: nsecs,
            mtimensec: nsecs,
            ctimensec: nsecs,
            blksize: 4096,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, ino: u64) -> Result<&Node, Errno> {
        self.nodes.get(&ino).ok_or(ENOENT)
    }

    pub fn get_mut(&mut self, ino: u64) -> Result<&mut Node, Errno> {
        self.nodes.get_mut(&ino).ok_or(ENOENT)
    }

    pub fn children(&self, ino: u64) -> Result<&[u64], Errno> {
        match &self.get(ino)?.content {
            Content::Directory(children) => Ok(children),
            Content::File(_) => Err(ENOTDIR),
        }
    }

    fn child(&self, dir: u64, name: &str) -> Result<Option<u64>, Errno> {
        Ok(self
            .children(dir)?
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name)))
    }

    /// Walks `path` from `base`. `.` and empty components stay put.
    pub fn resolve(&self, base: u64, path: &str) -> Result<u64, Errno> {
        let mut current = base;
        self.get(current)?;
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => current = self.get(current)?.parent,
                name => current = self.child(current, name)?.ok_or(ENOENT)?,
            }
        }
        Ok(current)
    }

    fn split_parent<'p>(&self, base: u64, path: &'p str) -> Result<(u64, &'p str), Errno> {
        let path = path.trim_end_matches('/');
        let (parent, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (self.resolve(base, dir)?, name),
            None => (base, path),
        };
        if name.is_empty() || name == "." || name == ".." {
            return Err(EINVAL);
        }
        self.children(parent)?;
        Ok((parent, name))
    }

    fn is_ancestor(&self, ancestor: u64, mut ino: u64) -> bool {
        loop {
            if ino == ancestor {
                return true;
            }
            match self.nodes.get(&ino) {
                Some(node) if node.parent != ino => ino = node.parent,
                _ => return false,
            }
        }
    }

    /// Creates a node at `path`. The type bits of `mode` pick file or
    /// directory; missing type bits mean a regular file.
    pub fn insert(&mut self, base: u64, path: &str, mode: u32, uid: u32, gid: u32) -> Result<u64, Errno> {
        let (parent, name) = self.split_parent(base, path)?;
        if self.child(parent, name)?.is_some() {
            return Err(EEXIST);
        }

        let mode = match mode & S_IFMT {
            0 => S_IFREG | mode,
            _ => mode,
        };
        let ino = self.next_ino;
        self.next_ino += 1;
        let content = if mode & S_IFMT == S_IFDIR {
            Content::Directory(Vec::new())
        } else {
            Content::File(Vec::new())
        };
        self.nodes.insert(
            ino,
            Node {
                parent,
                name: name.to_string(),
                attr: Self::new_attr(ino, mode, uid, gid),
                content,
            },
        );

        let parent = self.get_mut(parent)?;
        if let Content::Directory(children) = &mut parent.content {
            children.push(ino);
        }
        touch(&mut parent.attr, true);
        Ok(ino)
    }

    fn detach(&mut self, ino: u64) -> Result<(), Errno> {
        let parent = self.get(ino)?.parent;
        let parent = self.get_mut(parent)?;
        if let Content::Directory(children) = &mut parent.content {
            children.retain(|&c| c != ino);
        }
        touch(&mut parent.attr, true);
        Ok(())
    }

    /// Removes the node at `path`; `directory` selects rmdir semantics.
    pub fn remove(&mut self, base: u64, path: &str, directory: bool) -> Result<(), Errno> {
        let ino = self.resolve(base, path)?;
        if ino == ROOT_ID {
            return Err(EPERM);
        }
        match (&self.get(ino)?.content, directory) {
            (Content::Directory(children), true) if !children.is_empty() => return Err(ENOTEMPTY),
            (Content::Directory(_), false) => return Err(EISDIR),
            (Content::File(_), true) => return Err(ENOTDIR),
            _ => {}
        }
        self.detach(ino)?;
        self.nodes.remove(&ino);
        Ok(())
    }

    pub fn rename(&mut self, old_base: u64, old: &str, new_base: u64, new: &str) -> Result<(), Errno> {
        let source = self.resolve(old_base, old)?;
        if source == ROOT_ID {
            return Err(EPERM);
        }
        let (parent, name) = self.split_parent(new_base, new)?;
        if self.is_ancestor(source, parent) {
            return Err(EINVAL);
        }

        if let Some(target) = self.child(parent, name)? {
            if target == source {
                return Ok(());
            }
            let source_dir = matches!(self.get(source)?.content, Content::Directory(_));
            match (&self.get(target)?.content, source_dir) {
                (Content::Directory(children), true) if !children.is_empty() => return Err(ENOTEMPTY),
                (Content::Directory(_), false) => return Err(EISDIR),
                (Content::File(_), true) => return Err(ENOTDIR),
                _ => {}
            }
            self.detach(target)?;
            self.nodes.remove(&target);
        }

        self.detach(source)?;
        let node = self.get_mut(source)?;
        node.parent = parent;
        node.name = name.to_string();
        touch(&mut node.attr, false);
        let parent = self.get_mut(parent)?;
        if let Content::Directory(children) = &mut parent.content {
            children.push(source);
        }
        Ok(())
    }

    pub fn read(&self, ino: u64, offset: u64, size: u32) -> Result<Vec<u8>, Errno> {
        let data = self.get(ino)?.data()?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(size as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    pub fn write(&mut self, ino: u64, offset: u64, bytes: &[u8]) -> Result<u32, Errno> {
        let node = self.get_mut(ino)?;
        let Content::File(data) = &mut node.content else {
            return Err(EISDIR);
        };
        let start = usize::try_from(offset).map_err(|_| EINVAL)?;
        let end = start.checked_add(bytes.len()).ok_or(EINVAL)?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        sync_size(node);
        touch(&mut node.attr, true);
        Ok(bytes.len() as u32)
    }

    pub fn truncate(&mut self, ino: u64, size: u64) -> Result<(), Errno> {
        let node = self.get_mut(ino)?;
        let Content::File(data) = &mut node.content else {
            return Err(EISDIR);
        };
        data.resize(usize::try_from(size).map_err(|_| EINVAL)?, 0);
        sync_size(node);
        touch(&mut node.attr, true);
        Ok(())
    }

    pub fn file_data(&self, ino: u64) -> Result<&[u8], Errno> {
        self.get(ino)?.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> MemoryTree {
        MemoryTree::new(1000, 1000)
    }

    #[test]
    fn test_resolve_nested() {
        let mut t = tree();
        let dir = t.insert(ROOT_ID, "docs", S_IFDIR | 0o755, 0, 0).unwrap();
        let file = t.insert(ROOT_ID, "docs/a.txt", 0o644, 0, 0).unwrap();
        assert_eq!(t.resolve(ROOT_ID, "."), Ok(ROOT_ID));
        assert_eq!(t.resolve(ROOT_ID, "docs"), Ok(dir));
        assert_eq!(t.resolve(ROOT_ID, "docs/a.txt"), Ok(file));
        assert_eq!(t.resolve(dir, "a.txt"), Ok(file));
        assert_eq!(t.resolve(ROOT_ID, "docs/missing"), Err(ENOENT));
        assert_eq!(t.resolve(ROOT_ID, "docs/a.txt/x"), Err(ENOTDIR));
        assert_eq!(t.get(file).unwrap().attr.mode, S_IFREG | 0o644);
    }

    #[test]
    fn test_children_keep_creation_order() {
        let mut t = tree();
        for name in ["zeta", "alpha", "mid"] {
            t.insert(ROOT_ID, name, 0o644, 0, 0).unwrap();
        }
        let names: Vec<&str> = t
            .children(ROOT_ID)
            .unwrap()
            .iter()
            .map(|c| t.get(*c).unwrap().name.as_str())
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_remove_rules() {
        let mut t = tree();
        t.insert(ROOT_ID, "d", S_IFDIR | 0o755, 0, 0).unwrap();
        t.insert(ROOT_ID, "d/f", 0o644, 0, 0).unwrap();
        assert_eq!(t.remove(ROOT_ID, "d", true), Err(ENOTEMPTY));
        assert_eq!(t.remove(ROOT_ID, "d", false), Err(EISDIR));
        assert_eq!(t.remove(ROOT_ID, "d/f", true), Err(ENOTDIR));
        assert_eq!(t.remove(ROOT_ID, "d/f", false), Ok(()));
        assert_eq!(t.remove(ROOT_ID, "d", true), Ok(()));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_rename_moves_and_replaces() {
        let mut t = tree();
        let a = t.insert(ROOT_ID, "a", 0o644, 0, 0).unwrap();
        t.insert(ROOT_ID, "b", 0o644, 0, 0).unwrap();
        t.insert(ROOT_ID, "sub", S_IFDIR | 0o755, 0, 0).unwrap();

        t.rename(ROOT_ID, "a", ROOT_ID, "b").unwrap();
        assert_eq!(t.resolve(ROOT_ID, "b"), Ok(a));
        t.rename(ROOT_ID, "b", ROOT_ID, "sub/c").unwrap();
        assert_eq!(t.resolve(ROOT_ID, "sub/c"), Ok(a));
        assert_eq!(t.rename(ROOT_ID, "sub", ROOT_ID, "sub/inner"), Err(EINVAL));
    }

    #[test]
    fn test_write_extends_and_truncate_shrinks() {
        let mut t = tree();
        let f = t.insert(ROOT_ID, "f", 0o644, 0, 0).unwrap();
        assert_eq!(t.write(f, 4, b"data"), Ok(4));
        assert_eq!(t.file_data(f).unwrap(), b"\0\0\0\0data");
        assert_eq!(t.get(f).unwrap().attr.size, 8);
        t.truncate(f, 2).unwrap();
        assert_eq!(t.read(f, 0, 100).unwrap(), vec![0, 0]);
        assert_eq!(t.read(f, 50, 10).unwrap(), Vec::<u8>::new());
    }
}
