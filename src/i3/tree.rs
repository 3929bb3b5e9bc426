//! The layout tree returned by `GET_TREE`.
//!
//! Only the fields i3expo needs are deserialized; everything else in the
//! (large) reply is ignored.

use crate::command::{Focus, Rect, WindowInfo, WorkspaceInfo};
use serde::Deserialize;

/// Name i3 gives the hidden workspace that holds the scratchpad.
const SCRATCHPAD: &str = "__i3_scratch";

/// Container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Root,
    Output,
    Con,
    FloatingCon,
    Workspace,
    Dockarea,
    #[serde(other)]
    Other,
}

/// One container of the layout tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Node {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub num: Option<i64>,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub floating_nodes: Vec<Node>,
}

impl Node {
    fn children(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().chain(self.floating_nodes.iter())
    }

    fn is_scratchpad(&self) -> bool {
        self.node_type == NodeType::Workspace && self.name.as_deref() == Some(SCRATCHPAD)
    }

    fn workspace_info(&self, output: &str, focused: bool) -> WorkspaceInfo {
        WorkspaceInfo {
            id: self.id,
            num: self.num.filter(|n| *n >= 0),
            name: self.name.clone().unwrap_or_default(),
            visible: focused,
            focused,
            output: output.to_string(),
            rect: self.rect,
        }
    }

    /// Locate the focused container and the workspace enclosing it.
    ///
    /// Returns `None` if nothing is focused or the focused container is not
    /// inside a regular workspace.
    pub fn find_focused(&self) -> Option<Focus> {
        self.find_focused_in(None, None)
    }

    fn find_focused_in<'a>(
        &'a self,
        output: Option<&'a str>,
        workspace: Option<&'a Node>,
    ) -> Option<Focus> {
        let output = if self.node_type == NodeType::Output {
            self.name.as_deref()
        } else {
            output
        };
        let workspace = if self.node_type == NodeType::Workspace {
            Some(self)
        } else {
            workspace
        };

        if self.focused {
            let ws = workspace.filter(|w| !w.is_scratchpad())?;
            let window = (self.node_type != NodeType::Workspace).then(|| WindowInfo {
                id: self.id,
                name: self.name.clone().unwrap_or_default(),
                rect: self.rect,
            });
            return Some(Focus {
                workspace: ws.workspace_info(output.unwrap_or_default(), true),
                window,
            });
        }

        self.children()
            .find_map(|child| child.find_focused_in(output, workspace))
    }

    /// Every regular workspace in the tree, in tree order.
    pub fn workspaces(&self) -> Vec<WorkspaceInfo> {
        let mut out = Vec::new();
        self.collect_workspaces(None, &mut out);
        out
    }

    fn collect_workspaces(&self, output: Option<&str>, out: &mut Vec<WorkspaceInfo>) {
        let output = if self.node_type == NodeType::Output {
            self.name.as_deref()
        } else {
            output
        };
        if self.node_type == NodeType::Workspace {
            if !self.is_scratchpad() {
                out.push(self.workspace_info(output.unwrap_or_default(), false));
            }
            return;
        }
        for child in self.children() {
            child.collect_workspaces(output, out);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A trimmed-down `GET_TREE` reply: one output with two workspaces,
    /// the second holding a tiled and a floating window.
    pub(crate) const TREE_JSON: &str = r#"{
        "id": 1, "type": "root", "name": "root", "focused": false,
        "rect": {"x": 0, "y": 0, "width": 1920, "height": 1080},
        "nodes": [
            {"id": 2, "type": "output", "name": "__i3", "rect": {"x":0,"y":0,"width":1920,"height":1080},
             "nodes": [{"id": 3, "type": "con", "name": "content", "nodes": [
                {"id": 4, "type": "workspace", "name": "__i3_scratch", "num": -1, "nodes": []}
             ]}]},
            {"id": 10, "type": "output", "name": "DP-1",
             "rect": {"x": 0, "y": 0, "width": 1920, "height": 1080},
             "nodes": [
                {"id": 11, "type": "dockarea", "name": "topdock", "nodes": []},
                {"id": 12, "type": "con", "name": "content", "nodes": [
                    {"id": 100, "type": "workspace", "name": "1", "num": 1,
                     "rect": {"x": 0, "y": 20, "width": 1920, "height": 1060},
                     "nodes": []},
                    {"id": 200, "type": "workspace", "name": "2: web", "num": 2,
                     "rect": {"x": 0, "y": 20, "width": 1920, "height": 1060},
                     "nodes": [
                        {"id": 201, "type": "con", "name": "vim", "focused": false,
                         "rect": {"x": 0, "y": 20, "width": 960, "height": 1060}}
                     ],
                     "floating_nodes": [
                        {"id": 202, "type": "floating_con", "nodes": [
                            {"id": 203, "type": "con", "name": "firefox", "focused": true,
                             "rect": {"x": 300, "y": 220, "width": 800, "height": 600}}
                        ]}
                     ]}
                ]}
             ]}
        ]
    }"#;

    pub(crate) fn sample_tree() -> Node {
        serde_json::from_str(TREE_JSON).unwrap()
    }

    #[test]
    fn finds_focused_window_and_its_workspace() {
        let focus = sample_tree().find_focused().expect("something is focused");
        assert_eq!(focus.workspace.id, 200);
        assert_eq!(focus.workspace.name, "2: web");
        assert_eq!(focus.workspace.num, Some(2));
        assert_eq!(focus.workspace.output, "DP-1");
        let window = focus.window.expect("a window is focused");
        assert_eq!(window.id, 203);
        assert_eq!(window.name, "firefox");
        assert_eq!(window.rect, Rect::new(300, 220, 800, 600));
    }

    #[test]
    fn focused_empty_workspace_has_no_window() {
        let mut tree = sample_tree();
        fn unfocus_all(n: &mut Node) {
            n.focused = n.id == 100;
            n.nodes.iter_mut().for_each(unfocus_all);
            n.floating_nodes.iter_mut().for_each(unfocus_all);
        }
        unfocus_all(&mut tree);
        let focus = tree.find_focused().unwrap();
        assert_eq!(focus.workspace.id, 100);
        assert!(focus.window.is_none());
    }

    #[test]
    fn nothing_focused() {
        let mut tree = sample_tree();
        fn unfocus_all(n: &mut Node) {
            n.focused = false;
            n.nodes.iter_mut().for_each(unfocus_all);
            n.floating_nodes.iter_mut().for_each(unfocus_all);
        }
        unfocus_all(&mut tree);
        assert!(tree.find_focused().is_none());
    }

    #[test]
    fn lists_workspaces_without_scratchpad() {
        let names: Vec<String> = sample_tree()
            .workspaces()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["1", "2: web"]);
    }

    #[test]
    fn unknown_node_types_are_tolerated() {
        let node: Node =
            serde_json::from_str(r#"{"id": 5, "type": "something_new", "rect": {"x":0,"y":0,"width":1,"height":1}}"#)
                .unwrap();
        assert_eq!(node.node_type, NodeType::Other);
    }
}
