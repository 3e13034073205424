use crate::position::Position;

/// Kinds of string-valued leaf nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    AddressMode,
    Ident,
    Str,
    Number,
    Operator,
    TypeDesc,
    Label,
    ScopeBegin,
    ScopeEnd,
    Breakpoint,
}

/// Kinds of interior list nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// The top-level node list of a parsed module.
    Module,
    Instruction,
    Expression,
    Macro,
    Conditional,
    Constant,
}

/// A string-valued leaf node.
#[derive(Debug, Clone)]
pub struct Value {
    pub pos: Position,
    pub kind: ValueKind,
    pub text: String,
}

impl Value {
    pub fn new(pos: Position, kind: ValueKind, text: impl Into<String>) -> Value {
        Value {
            pos,
            kind,
            text: text.into(),
        }
    }
}

/// An ordered collection of nodes, itself a node.
#[derive(Debug, Clone)]
pub struct List {
    pub pos: Position,
    pub kind: ListKind,
    children: Vec<Node>,
}

impl List {
    pub fn new(pos: Position, kind: ListKind) -> List {
        List {
            pos,
            kind,
            children: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn at(&self, index: usize) -> &Node {
        &self.children[index]
    }

    pub fn at_mut(&mut self, index: usize) -> &mut Node {
        &mut self.children[index]
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn extend(&mut self, nodes: Vec<Node>) {
        self.children.extend(nodes);
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    /// Replaces the node at index with the given set. An empty set removes
    /// the node; the replacement owns its nodes.
    pub fn replace_at(&mut self, index: usize, set: Vec<Node>) {
        self.children.splice(index..index + 1, set);
    }

    /// Inserts the given set before index.
    pub fn insert_at(&mut self, index: usize, set: Vec<Node>) {
        self.children.splice(index..index, set);
    }

    pub fn remove(&mut self, index: usize) -> Node {
        self.children.remove(index)
    }

    /// Removes the inclusive range of nodes from start through end.
    pub fn remove_range(&mut self, start: usize, end: usize) {
        self.children.drain(start..=end);
    }

    pub fn take_children(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.children)
    }
}

/// A generic AST node: either a leaf value or an interior list.
#[derive(Debug, Clone)]
pub enum Node {
    Value(Value),
    List(List),
}

impl Node {
    pub fn value(pos: Position, kind: ValueKind, text: impl Into<String>) -> Node {
        Node::Value(Value::new(pos, kind, text))
    }

    pub fn pos(&self) -> &Position {
        match self {
            Node::Value(v) => &v.pos,
            Node::List(l) => &l.pos,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(v) => Some(v),
            Node::List(_) => None,
        }
    }

    pub fn as_value_mut(&mut self) -> Option<&mut Value> {
        match self {
            Node::Value(v) => Some(v),
            Node::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Node::List(l) => Some(l),
            Node::Value(_) => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut List> {
        match self {
            Node::List(l) => Some(l),
            Node::Value(_) => None,
        }
    }

    pub fn value_kind(&self) -> Option<ValueKind> {
        self.as_value().map(|v| v.kind)
    }

    pub fn list_kind(&self) -> Option<ListKind> {
        self.as_list().map(|l| l.kind)
    }

    pub fn is_value(&self, kind: ValueKind) -> bool {
        self.value_kind() == Some(kind)
    }

    pub fn is_list(&self, kind: ListKind) -> bool {
        self.list_kind() == Some(kind)
    }

    /// Returns the leaf text if this is a value node of the given kind.
    pub fn text_of(&self, kind: ValueKind) -> Option<&str> {
        match self {
            Node::Value(v) if v.kind == kind => Some(&v.text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(text: &str) -> Node {
        Node::value(Position::default(), ValueKind::Number, text)
    }

    fn texts(list: &List) -> Vec<&str> {
        list.children()
            .iter()
            .map(|n| n.as_value().expect("value").text.as_str())
            .collect()
    }

    #[test]
    fn replace_at_swaps_in_multiple_nodes() {
        let mut list = List::new(Position::default(), ListKind::Module);
        list.push(num("1"));
        list.push(num("2"));
        list.push(num("3"));

        list.replace_at(1, vec![num("a"), num("b")]);
        assert_eq!(texts(&list), vec!["1", "a", "b", "3"]);

        list.replace_at(0, Vec::new());
        assert_eq!(texts(&list), vec!["a", "b", "3"]);
    }

    #[test]
    fn remove_range_is_inclusive() {
        let mut list = List::new(Position::default(), ListKind::Expression);
        for text in ["1", "2", "3", "4", "5"] {
            list.push(num(text));
        }

        list.remove_range(1, 3);
        assert_eq!(texts(&list), vec!["1", "5"]);
    }

    #[test]
    fn insert_at_splices_before_index() {
        let mut list = List::new(Position::default(), ListKind::Module);
        list.push(num("1"));
        list.push(num("4"));

        list.insert_at(1, vec![num("2"), num("3")]);
        assert_eq!(texts(&list), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn deep_clone_is_independent() {
        let mut list = List::new(Position::default(), ListKind::Instruction);
        list.push(num("1"));
        let copy = list.clone();

        list.at_mut(0).as_value_mut().expect("value").text = "changed".into();
        assert_eq!(texts(&copy), vec!["1"]);
    }
}
