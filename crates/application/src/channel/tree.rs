//! 公开频道树
//!
//! 结构字段（父子关系、名称、路径缓存）由树级读写锁保护；每个节点的可变标量
//! （话题、归档、强制通知、更新者）由节点自身的锁保护。任何操作同一时刻最多持有一个节点锁。
//! 每次写操作都会重新生成 JSON 快照。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use domain::{Channel, ChannelId, DomainError, DomainResult};
use parking_lot::RwLock;
use serde::Serialize;

struct Node {
    parent: ChannelId,
    children: Vec<ChannelId>,
    channel: RwLock<Channel>,
}

struct TreeState {
    nodes: HashMap<ChannelId, Node>,
    roots: Vec<ChannelId>,
    paths: HashMap<ChannelId, String>,
    snapshot: Arc<str>,
}

impl Default for TreeState {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            paths: HashMap::new(),
            snapshot: Arc::from("[]"),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeJson<'a> {
    id: ChannelId,
    parent_id: Option<ChannelId>,
    name: &'a str,
    topic: &'a str,
    children: &'a [ChannelId],
    archived: bool,
    force: bool,
}

impl TreeState {
    fn children_of(&self, parent: ChannelId) -> Option<&Vec<ChannelId>> {
        if parent.is_nil() {
            Some(&self.roots)
        } else {
            self.nodes.get(&parent).map(|n| &n.children)
        }
    }

    fn children_of_mut(&mut self, parent: ChannelId) -> Option<&mut Vec<ChannelId>> {
        if parent.is_nil() {
            Some(&mut self.roots)
        } else {
            self.nodes.get_mut(&parent).map(|n| &mut n.children)
        }
    }

    fn name_of(&self, id: ChannelId) -> Option<String> {
        self.nodes.get(&id).map(|n| n.channel.read().name.clone())
    }

    fn find_child(&self, parent: ChannelId, name: &str) -> Option<ChannelId> {
        self.children_of(parent)?.iter().copied().find(|child| {
            self.nodes
                .get(child)
                .map(|n| n.channel.read().name.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    fn ascendants(&self, id: ChannelId) -> Vec<ChannelId> {
        let mut result = Vec::new();
        let mut current = self.nodes.get(&id).map(|n| n.parent);
        while let Some(parent) = current {
            if parent.is_nil() || result.contains(&parent) {
                break;
            }
            result.push(parent);
            current = self.nodes.get(&parent).map(|n| n.parent);
        }
        result
    }

    fn descendants(&self, id: ChannelId) -> Vec<ChannelId> {
        let mut result = Vec::new();
        let mut queue: VecDeque<ChannelId> = self
            .children_of(id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            result.push(next);
            if let Some(node) = self.nodes.get(&next) {
                queue.extend(node.children.iter().copied());
            }
        }
        result
    }

    fn depth(&self, id: ChannelId) -> usize {
        match self.nodes.get(&id) {
            Some(node) => 1 + node.children.iter().map(|c| self.depth(*c)).max().unwrap_or(0),
            None => 0,
        }
    }

    /// 重新计算 `id` 及其全部后代的路径
    fn recompute_paths(&mut self, id: ChannelId) {
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            let name = node.channel.read().name.clone();
            let path = if node.parent.is_nil() {
                name
            } else {
                match self.paths.get(&node.parent) {
                    Some(parent_path) => format!("{parent_path}/{name}"),
                    None => name,
                }
            };
            queue.extend(node.children.iter().copied());
            self.paths.insert(current, path);
        }
    }

    fn regenerate_snapshot(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<ChannelId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                order.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }

        let channels: Vec<(ChannelId, &Node, Channel)> = order
            .iter()
            .filter_map(|id| {
                self.nodes
                    .get(id)
                    .map(|n| (*id, n, n.channel.read().clone()))
            })
            .collect();
        let nodes: Vec<NodeJson<'_>> = channels
            .iter()
            .map(|(id, node, ch)| {
                NodeJson {
                    id: *id,
                    parent_id: (!node.parent.is_nil()).then_some(node.parent),
                    name: &ch.name,
                    topic: &ch.topic,
                    children: &node.children,
                    archived: ch.is_archived(),
                    force: ch.is_forced,
                }
            })
            .collect();

        self.snapshot = match serde_json::to_string(&nodes) {
            Ok(json) => Arc::from(json),
            Err(err) => {
                tracing::error!(error = %err, "频道树序列化失败");
                Arc::from("[]")
            }
        };
    }

    fn insert(&mut self, channel: &Channel) -> DomainResult<()> {
        if self.nodes.contains_key(&channel.id) {
            return Err(DomainError::AlreadyExists);
        }
        let parent = channel.parent_id;
        let siblings = self
            .children_of_mut(parent)
            .ok_or(DomainError::InvalidParentChannel)?;
        siblings.push(channel.id);
        self.nodes.insert(
            channel.id,
            Node {
                parent,
                children: Vec::new(),
                channel: RwLock::new(channel.clone()),
            },
        );
        self.recompute_paths(channel.id);
        Ok(())
    }
}

/// 公开频道树
pub struct ChannelTree {
    state: RwLock<TreeState>,
}

impl Default for ChannelTree {
    fn default() -> Self {
        Self::from_channels(Vec::new())
    }
}

impl ChannelTree {
    /// 由数据库快照重建，父频道不存在的节点会被跳过
    pub fn from_channels(channels: Vec<Channel>) -> Self {
        let mut by_parent: HashMap<ChannelId, Vec<Channel>> = HashMap::new();
        for channel in channels {
            if !channel.is_public || channel.is_dm_channel() {
                continue;
            }
            by_parent.entry(channel.parent_id).or_default().push(channel);
        }

        let mut state = TreeState::default();
        let mut queue = VecDeque::from([ChannelId::nil()]);
        while let Some(parent) = queue.pop_front() {
            let Some(mut children) = by_parent.remove(&parent) else {
                continue;
            };
            children.sort_by_key(|c| c.created_at);
            for child in children {
                queue.push_back(child.id);
                if let Err(err) = state.insert(&child) {
                    tracing::warn!(channel_id = %child.id, error = %err, "重建频道树时跳过节点");
                }
            }
        }
        for orphan in by_parent.values().flatten() {
            tracing::warn!(channel_id = %orphan.id, parent_id = %orphan.parent_id, "频道的父频道不存在");
        }
        state.regenerate_snapshot();

        Self {
            state: RwLock::new(state),
        }
    }

    /// 加入新频道，父频道必须为顶层或已存在
    pub fn add(&self, channel: &Channel) -> DomainResult<()> {
        let mut state = self.state.write();
        state.insert(channel)?;
        state.regenerate_snapshot();
        Ok(())
    }

    /// 移动和/或重命名，子树路径随之更新
    pub fn move_channel(
        &self,
        id: ChannelId,
        new_parent: Option<ChannelId>,
        new_name: Option<&str>,
    ) -> DomainResult<()> {
        let mut state = self.state.write();
        let old_parent = state.nodes.get(&id).ok_or(DomainError::NotFound)?.parent;

        if let Some(parent) = new_parent.filter(|p| *p != old_parent) {
            if parent == id || state.ascendants(parent).contains(&id) {
                return Err(DomainError::TooDeepChannel);
            }
            if state.children_of(parent).is_none() {
                return Err(DomainError::InvalidParentChannel);
            }
            if let Some(siblings) = state.children_of_mut(old_parent) {
                siblings.retain(|c| *c != id);
            }
            if let Some(siblings) = state.children_of_mut(parent) {
                siblings.push(id);
            }
            if let Some(node) = state.nodes.get_mut(&id) {
                node.parent = parent;
                node.channel.write().parent_id = parent;
            }
        }

        if let Some(name) = new_name {
            if let Some(node) = state.nodes.get(&id) {
                node.channel.write().name = name.to_string();
            }
        }

        state.recompute_paths(id);
        state.regenerate_snapshot();
        Ok(())
    }

    /// 更新非结构字段
    pub fn update_single(&self, channel: &Channel) {
        self.update_multiple(std::slice::from_ref(channel));
    }

    pub fn update_multiple(&self, channels: &[Channel]) {
        let mut state = self.state.write();
        for channel in channels {
            if let Some(node) = state.nodes.get(&channel.id) {
                let mut current = node.channel.write();
                current.topic = channel.topic.clone();
                current.is_visible = channel.is_visible;
                current.is_forced = channel.is_forced;
                current.updater_id = channel.updater_id;
                current.updated_at = channel.updated_at;
            }
        }
        state.regenerate_snapshot();
    }

    pub fn get_channel(&self, id: ChannelId) -> Option<Channel> {
        self.state
            .read()
            .nodes
            .get(&id)
            .map(|n| n.channel.read().clone())
    }

    pub fn is_channel_present(&self, id: ChannelId) -> bool {
        self.state.read().nodes.contains_key(&id)
    }

    /// nil 返回顶层频道
    pub fn get_children_ids(&self, id: ChannelId) -> Vec<ChannelId> {
        self.state
            .read()
            .children_of(id)
            .cloned()
            .unwrap_or_default()
    }

    /// 广度优先顺序
    pub fn get_descendant_ids(&self, id: ChannelId) -> Vec<ChannelId> {
        let state = self.state.read();
        if !id.is_nil() && !state.nodes.contains_key(&id) {
            return Vec::new();
        }
        state.descendants(id)
    }

    /// 从直接父频道开始向上
    pub fn get_ascendant_ids(&self, id: ChannelId) -> Vec<ChannelId> {
        self.state.read().ascendants(id)
    }

    /// 以自身为 1 的子树高度，不存在时为 0
    pub fn get_channel_depth(&self, id: ChannelId) -> usize {
        self.state.read().depth(id)
    }

    /// 大小写不敏感
    pub fn is_child_present(&self, name: &str, parent: ChannelId) -> bool {
        self.state.read().find_child(parent, name).is_some()
    }

    pub fn get_channel_path(&self, id: ChannelId) -> Option<String> {
        self.state.read().paths.get(&id).cloned()
    }

    /// 大小写不敏感地逐级查找，例如 `general/random`
    pub fn get_channel_id_from_path(&self, path: &str) -> Option<ChannelId> {
        let state = self.state.read();
        let mut current = ChannelId::nil();
        for segment in path.trim_matches('/').split('/') {
            if segment.is_empty() {
                return None;
            }
            current = state.find_child(current, segment)?;
        }
        (!current.is_nil()).then_some(current)
    }

    pub fn is_force_channel(&self, id: ChannelId) -> bool {
        self.state
            .read()
            .nodes
            .get(&id)
            .map(|n| n.channel.read().is_forced)
            .unwrap_or(false)
    }

    pub fn is_archived_channel(&self, id: ChannelId) -> bool {
        self.state
            .read()
            .nodes
            .get(&id)
            .map(|n| n.channel.read().is_archived())
            .unwrap_or(false)
    }

    pub fn channel_name(&self, id: ChannelId) -> Option<String> {
        self.state.read().name_of(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 返回缓存的 JSON 快照
    pub fn marshal_json(&self) -> Arc<str> {
        self.state.read().snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::UserId;

    fn public(name: &str, parent: ChannelId) -> Channel {
        Channel::new_public(name, parent, UserId::generate())
    }

    /// a/b/c, a/d
    fn sample() -> (ChannelTree, [ChannelId; 4]) {
        let tree = ChannelTree::default();
        let a = public("a", ChannelId::nil());
        let b = public("b", a.id);
        let c = public("c", b.id);
        let d = public("d", a.id);
        for ch in [&a, &b, &c, &d] {
            tree.add(ch).unwrap();
        }
        (tree, [a.id, b.id, c.id, d.id])
    }

    #[test]
    fn paths_follow_parents() {
        let (tree, [a, b, c, d]) = sample();
        assert_eq!(tree.get_channel_path(a).as_deref(), Some("a"));
        assert_eq!(tree.get_channel_path(c).as_deref(), Some("a/b/c"));
        assert_eq!(tree.get_channel_path(d).as_deref(), Some("a/d"));
        assert_eq!(tree.get_channel_id_from_path("A/B/c"), Some(c));
        assert_eq!(tree.get_channel_id_from_path("a/x"), None);
        assert_eq!(tree.get_ascendant_ids(c), vec![b, a]);
        assert_eq!(tree.get_descendant_ids(a), vec![b, d, c]);
        assert_eq!(tree.get_children_ids(ChannelId::nil()), vec![a]);
    }

    #[test]
    fn depth_counts_self_and_deepest_subtree() {
        let (tree, [a, b, c, d]) = sample();
        assert_eq!(tree.get_channel_depth(a), 3);
        assert_eq!(tree.get_channel_depth(b), 2);
        assert_eq!(tree.get_channel_depth(c), 1);
        assert_eq!(tree.get_channel_depth(d), 1);
        assert_eq!(tree.get_channel_depth(ChannelId::generate()), 0);
    }

    #[test]
    fn sibling_lookup_is_case_insensitive() {
        let (tree, [a, ..]) = sample();
        assert!(tree.is_child_present("B", a));
        assert!(tree.is_child_present("A", ChannelId::nil()));
        assert!(!tree.is_child_present("c", a));
    }

    #[test]
    fn add_rejects_unknown_parent() {
        let tree = ChannelTree::default();
        let orphan = public("x", ChannelId::generate());
        assert_eq!(tree.add(&orphan), Err(DomainError::InvalidParentChannel));
        assert!(tree.is_empty());
    }

    #[test]
    fn move_recomputes_subtree_paths() {
        let (tree, [a, b, c, d]) = sample();
        tree.move_channel(b, Some(d), Some("bee")).unwrap();
        assert_eq!(tree.get_channel_path(b).as_deref(), Some("a/d/bee"));
        assert_eq!(tree.get_channel_path(c).as_deref(), Some("a/d/bee/c"));
        assert_eq!(tree.get_children_ids(a), vec![d]);
        assert_eq!(tree.get_channel(b).unwrap().parent_id, d);

        tree.move_channel(b, Some(ChannelId::nil()), None).unwrap();
        assert_eq!(tree.get_channel_path(c).as_deref(), Some("bee/c"));

        assert_eq!(
            tree.move_channel(a, Some(a), None),
            Err(DomainError::TooDeepChannel)
        );
    }

    #[test]
    fn snapshot_reflects_updates() {
        let (tree, [a, ..]) = sample();
        let mut channel = tree.get_channel(a).unwrap();
        channel.is_visible = false;
        channel.topic = "hello".to_string();
        tree.update_single(&channel);

        assert!(tree.is_archived_channel(a));
        let json: serde_json::Value = serde_json::from_str(&tree.marshal_json()).unwrap();
        let nodes = json.as_array().unwrap();
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[0]["name"], "a");
        assert_eq!(nodes[0]["topic"], "hello");
        assert_eq!(nodes[0]["archived"], true);
        assert!(nodes[0]["parentId"].is_null());
        assert_eq!(nodes[0]["children"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn rebuild_skips_orphans_and_dm_channels() {
        let a = public("a", ChannelId::nil());
        let b = public("b", a.id);
        let orphan = public("o", ChannelId::generate());
        let dm = Channel::new_direct_message("dm_abc");
        let tree = ChannelTree::from_channels(vec![b.clone(), orphan, dm, a.clone()]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get_channel_path(b.id).as_deref(), Some("a/b"));
    }
}
