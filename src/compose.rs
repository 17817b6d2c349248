use crate::ast::{BlockActionKind, NodeId, NodeKind, Position, Tree};
use crate::error::{RazorleafError, RazorleafResult, SemanticErrorKind};
use crate::interface::Loader;
use crate::parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Inclusion,
    Extension,
}

/// Loads every template `root` includes or extends, transitively, and merges
/// them into a single tree. Returns the root to compile, which is the
/// outermost parent's root when `root` extends another template.
pub(crate) fn resolve(
    tree: &mut Tree,
    root: NodeId,
    name: &str,
    loader: Option<&dyn Loader>,
) -> RazorleafResult<NodeId> {
    let mut resolver = Resolver {
        tree,
        loader,
        path: vec![name.to_owned()],
    };
    resolver.resolve_root(root)
}

struct Resolver<'a> {
    tree: &'a mut Tree,
    loader: Option<&'a dyn Loader>,
    /// Names of the templates currently being loaded, outermost first.
    path: Vec<String>,
}

impl Resolver<'_> {
    fn resolve_root(&mut self, root: NodeId) -> RazorleafResult<NodeId> {
        let includes = self.tree.root(root).includes.clone();
        for include in includes {
            self.include(root, include)?;
        }

        let Some(extends) = self.tree.root(root).extends.clone() else {
            return Ok(root);
        };

        let parent = self.load(root, extends.position, &extends.name, Relation::Extension)?;
        self.apply_block_actions(root, parent)?;
        self.merge_macros(root, parent, root)?;

        tracing::debug!(parent = %extends.name, "applied template extension");
        Ok(parent)
    }

    fn include(&mut self, root: NodeId, include: NodeId) -> RazorleafResult<()> {
        let NodeKind::Include { template } = self.tree.kind(include) else {
            return Ok(());
        };
        let template = template.clone();
        let position = self.tree.node(include).position;

        let included = self.load(include, position, &template, Relation::Inclusion)?;
        let children = self.tree.children(included).to_vec();
        self.tree.splice(include, children);
        self.merge_macros(included, root, include)?;
        self.merge_blocks(included, root, include)
    }

    /// Makes the blocks of an included template targetable by templates
    /// that extend the includer.
    fn merge_blocks(&mut self, from: NodeId, into: NodeId, site: NodeId) -> RazorleafResult<()> {
        let blocks = self.tree.root(from).blocks.clone();

        for (name, id) in blocks {
            if let Some(&existing) = self.tree.root(into).blocks.get(&name) {
                let previous = self.tree.location(existing);
                return Err(self
                    .tree
                    .semantic_error(site, SemanticErrorKind::DuplicateBlock { name, previous })
                    .into());
            }
            self.tree.root_mut(into).blocks.insert(name, id);
        }

        Ok(())
    }

    /// Makes the macros defined in `from` available to `into`. Redefining a
    /// macro is reported at `site`.
    fn merge_macros(&mut self, from: NodeId, into: NodeId, site: NodeId) -> RazorleafResult<()> {
        let macros = self.tree.root(from).macros.clone();

        for (name, id) in macros {
            if let Some(&existing) = self.tree.root(into).macros.get(&name) {
                let previous = self.tree.location(existing);
                return Err(self
                    .tree
                    .semantic_error(site, SemanticErrorKind::DuplicateMacro { name, previous })
                    .into());
            }
            self.tree.root_mut(into).macros.insert(name, id);
        }

        Ok(())
    }

    fn apply_block_actions(&mut self, child: NodeId, parent: NodeId) -> RazorleafResult<()> {
        let actions = self.tree.root(child).block_actions.clone();

        for action in actions {
            let Some(&target) = self.tree.root(parent).blocks.get(&action.name) else {
                return Err(self
                    .tree
                    .semantic_error(action.node, SemanticErrorKind::MissingBlock(action.name))
                    .into());
            };

            let content = self.tree.children(action.node).to_vec();

            match action.kind {
                BlockActionKind::Define | BlockActionKind::Replace => {
                    for replaced in self.tree.descendants(target) {
                        if let NodeKind::Block { name } = self.tree.kind(replaced) {
                            let name = name.clone();
                            let blocks = &mut self.tree.root_mut(parent).blocks;
                            if blocks.get(&name) == Some(&replaced) {
                                blocks.shift_remove(&name);
                            }
                        }
                    }
                    self.tree.set_children(target, content.clone());
                }
                BlockActionKind::Append => self.tree.extend_children(target, content.clone()),
            }

            for node in content {
                self.register_blocks(parent, node)?;
            }

            tracing::trace!(block = %action.name, kind = ?action.kind, "applied block action");
        }

        Ok(())
    }

    /// Registers `node` and the blocks nested in it with `root`, so that
    /// templates further down an extension chain can target them.
    fn register_blocks(&mut self, root: NodeId, node: NodeId) -> RazorleafResult<()> {
        let mut nodes = vec![node];
        nodes.extend(self.tree.descendants(node));

        for id in nodes {
            let NodeKind::Block { name } = self.tree.kind(id) else {
                continue;
            };
            let name = name.clone();

            if let Some(&existing) = self.tree.root(root).blocks.get(&name)
                && existing != id
            {
                let previous = self.tree.location(existing);
                return Err(self
                    .tree
                    .semantic_error(id, SemanticErrorKind::DuplicateBlock { name, previous })
                    .into());
            }
            self.tree.root_mut(root).blocks.insert(name, id);
        }

        Ok(())
    }

    fn load(
        &mut self,
        site: NodeId,
        position: Position,
        name: &str,
        relation: Relation,
    ) -> RazorleafResult<NodeId> {
        if let Some(index) = self.path.iter().position(|loading| loading == name) {
            let chain = self.path[index..].to_vec();
            let kind = match relation {
                Relation::Inclusion => SemanticErrorKind::CircularInclusion(chain),
                Relation::Extension => SemanticErrorKind::CircularExtension(chain),
            };
            return Err(self.tree.semantic_error_at(site, position, kind).into());
        }

        let Some(loader) = self.loader else {
            return Err(RazorleafError::MissingLoader {
                template_name: name.to_owned(),
            });
        };

        let source = loader.load(name).map_err(|error| RazorleafError::Load {
            template_name: name.to_owned(),
            reason: error.to_string(),
        })?;

        tracing::debug!(template = name, relation = ?relation, "loaded template");

        let root = parser::parse(self.tree, &source, name)?;

        self.path.push(name.to_owned());
        let resolved = self.resolve_root(root);
        self.path.pop();

        resolved
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn templates(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(name, source)| ((*name).to_owned(), (*source).to_owned()))
            .collect()
    }

    fn resolve_source(source: &str, loader: &HashMap<String, String>) -> RazorleafResult<(Tree, NodeId)> {
        let mut tree = Tree::new();
        let root = parser::parse(&mut tree, source, "main")?;
        let root = resolve(&mut tree, root, "main", Some(loader))?;
        Ok((tree, root))
    }

    /// Element names of the resolved tree in document order.
    fn elements(tree: &Tree, root: NodeId) -> Vec<String> {
        tree.descendants(root)
            .into_iter()
            .filter_map(|id| match tree.kind(id) {
                NodeKind::Element { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn semantic_kind(result: RazorleafResult<(Tree, NodeId)>) -> SemanticErrorKind {
        match result {
            Err(RazorleafError::Semantic(error)) => error.kind,
            Err(other) => panic!("expected a semantic error, got {other:?}"),
            Ok(_) => panic!("expected a semantic error"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn include_splices_content_and_macros() {
        let loader = templates(&[("header", "header\nmacro logo\n\t\"logo\"\n")]);
        let (tree, root) = resolve_source("include header\nmain\n", &loader).expect("resolves");

        assert_eq!(elements(&tree, root), ["header", "main"]);
        assert!(tree.root(root).macros.contains_key("logo"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn extension_applies_actions_in_order() {
        let loader = templates(&[(
            "layout",
            "html\n\tblock head\n\t\ttitle\n\tblock body\n\t\tp\n",
        )]);
        let (tree, root) = resolve_source(
            "extends layout\nreplace body\n\tmain\nappend head\n\tmeta\n",
            &loader,
        )
        .expect("resolves");

        assert_eq!(elements(&tree, root), ["html", "title", "meta", "main"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn nested_blocks_are_targetable_down_the_chain() {
        let loader = templates(&[
            ("base", "body\n\tblock content\n"),
            ("page", "extends base\nblock content\n\tarticle\n\t\tblock article\n"),
        ]);
        let (tree, root) = resolve_source("extends page\nreplace article\n\th1\n", &loader).expect("resolves");

        assert_eq!(elements(&tree, root), ["body", "article", "h1"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn included_blocks_can_be_replaced() {
        let loader = templates(&[
            ("nav", "nav\n\tblock links\n\t\ta\n"),
            ("layout", "body\n\tinclude nav\n"),
        ]);
        let (tree, root) = resolve_source("extends layout\nreplace links\n\tul\n", &loader).expect("resolves");

        assert_eq!(elements(&tree, root), ["body", "nav", "ul"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn missing_block_is_reported() {
        let loader = templates(&[("layout", "block body\n")]);
        let kind = semantic_kind(resolve_source("extends layout\nreplace footer\n", &loader));

        assert_eq!(kind, SemanticErrorKind::MissingBlock("footer".to_owned()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn circular_inclusion_lists_the_chain() {
        let loader = templates(&[("a", "include b\n"), ("b", "include a\n")]);
        let kind = semantic_kind(resolve_source("include a\n", &loader));

        assert_eq!(
            kind,
            SemanticErrorKind::CircularInclusion(vec!["a".to_owned(), "b".to_owned()])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn circular_extension_is_named_by_the_closing_edge() {
        let loader = templates(&[("a", "include b\n"), ("b", "extends a\n")]);
        let kind = semantic_kind(resolve_source("extends a\n", &loader));

        assert_eq!(
            kind,
            SemanticErrorKind::CircularExtension(vec!["a".to_owned(), "b".to_owned()])
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn redefined_macro_is_an_error() {
        let loader = templates(&[("macros", "macro m\n\tp\n")]);
        let kind = semantic_kind(resolve_source("macro m\n\tdiv\ninclude macros\n", &loader));

        assert!(matches!(kind, SemanticErrorKind::DuplicateMacro { ref name, .. } if name == "m"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn loading_without_a_loader_fails() {
        let mut tree = Tree::new();
        let root = parser::parse(&mut tree, "include header\n", "main").expect("parses");

        match resolve(&mut tree, root, "main", None) {
            Err(RazorleafError::MissingLoader { template_name }) => assert_eq!(template_name, "header"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn loader_failures_carry_the_reason() {
        let loader = templates(&[]);

        match resolve_source("include nowhere\n", &loader) {
            Err(RazorleafError::Load { template_name, reason }) => {
                assert_eq!(template_name, "nowhere");
                assert_eq!(reason, "no template with this name exists");
            }
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("expected a load error"),
        }
    }
}
