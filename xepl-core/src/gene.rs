use crate::flags::{AtomFlags, Flag};
use crate::wire::Wire;
use crate::xml::{self, print::XmlBuilder};
use crate::Cord;
use anyhow::{anyhow, Result};
use fxhash::FxHashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

static LIVE_GENES: AtomicUsize = AtomicUsize::new(0);

/// Number of genes currently alive in the process. Used by leak assertions
/// and the memory report.
pub fn live_genes() -> usize {
    LIVE_GENES.load(Ordering::Acquire)
}

/// Ordered children plus the name index. A child may share its name with
/// earlier siblings; lookups return the eldest.
#[derive(Default)]
struct Kids {
    list: Vec<Gene>,
    by_name: FxHashMap<Cord, SmallVec<[Gene; 2]>>,
}

/// The structure a duplicate shares with its original: content, children
/// and the owner back-reference.
#[derive(Default)]
struct Body {
    content: Mutex<Option<Wire>>,
    kids: Mutex<Kids>,
    owner: Mutex<Weak<GeneInner>>,
}

struct GeneInner {
    name: Cord,
    space: Option<Cord>,
    traits: Mutex<IndexMap<Cord, String>>,
    body: Arc<Body>,
    flags: AtomFlags,
}

impl Drop for GeneInner {
    fn drop(&mut self) {
        LIVE_GENES.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A named tree node: element tag, optional namespace, text content,
/// ordered traits and ordered children. Cloning the handle shares the node.
#[derive(Clone)]
pub struct Gene(Arc<GeneInner>);

/// Non-owning gene handle, used for owner back-references.
#[derive(Clone, Default)]
pub struct WeakGene(Weak<GeneInner>);

impl WeakGene {
    pub fn upgrade(&self) -> Option<Gene> {
        self.0.upgrade().map(Gene)
    }
}

impl fmt::Debug for Gene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gene({})", self.0.name)
    }
}

impl Gene {
    fn build(name: Cord, space: Option<Cord>, body: Arc<Body>, traits: IndexMap<Cord, String>) -> Gene {
        LIVE_GENES.fetch_add(1, Ordering::AcqRel);
        Gene(Arc::new(GeneInner {
            name,
            space,
            traits: Mutex::new(traits),
            body,
            flags: AtomFlags::new(),
        }))
    }

    pub fn new(name: impl Into<Cord>) -> Gene {
        Gene::build(name.into(), None, Arc::new(Body::default()), IndexMap::new())
    }

    pub fn with_space(name: impl Into<Cord>, space: Option<Cord>) -> Gene {
        Gene::build(name.into(), space, Arc::new(Body::default()), IndexMap::new())
    }

    /// Create a gene attached to `parent`.
    pub fn new_in(parent: &Gene, name: impl Into<Cord>, space: Option<Cord>) -> Gene {
        let gene = Gene::with_space(name, space);
        parent.add_gene(&gene);
        gene
    }

    /// Parse an XML document and return its root element.
    pub fn parse(text: &str) -> Result<Gene> {
        let holder = Gene::new("text");
        xml::parse_into(&holder, text)?;
        holder
            .first()
            .ok_or_else(|| anyhow!("document has no root element"))
    }

    pub fn name(&self) -> &Cord {
        &self.0.name
    }

    pub fn space(&self) -> Option<&Cord> {
        self.0.space.as_ref()
    }

    pub fn is_duplicate(&self) -> bool {
        self.0.flags.test(Flag::Duplicate)
    }

    /// Handle identity, not structural equality.
    pub fn same(&self, other: &Gene) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakGene {
        WeakGene(Arc::downgrade(&self.0))
    }

    pub fn owner(&self) -> Option<Gene> {
        self.0.body.owner.lock().upgrade().map(Gene)
    }

    // ---- traits ------------------------------------------------------

    /// Upsert. A new key takes the next slot; an existing key keeps the slot
    /// of its first insertion.
    pub fn trait_set(&self, name: &str, value: &str) {
        let mut traits = self.0.traits.lock();
        if let Some(slot) = traits.get_mut(name) {
            slot.clear();
            slot.push_str(value);
        } else {
            traits.insert(Cord::from(name), value.to_string());
        }
    }

    pub fn trait_get(&self, name: &str) -> Option<String> {
        self.0.traits.lock().get(name).cloned()
    }

    pub fn trait_default(&self, name: &str, default: &str) -> String {
        self.trait_get(name).unwrap_or_else(|| default.to_string())
    }

    pub fn has_traits(&self) -> bool {
        !self.0.traits.lock().is_empty()
    }

    /// Stable snapshot of the traits in order.
    pub fn traits_snapshot(&self) -> Vec<(Cord, String)> {
        self.0
            .traits
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Clone `other`'s traits into this gene, upserting in order.
    pub fn absorb_traits(&self, other: &Gene) {
        for (name, value) in other.traits_snapshot() {
            self.trait_set(&name, &value);
        }
    }

    // ---- content -----------------------------------------------------

    pub fn has_content(&self) -> bool {
        self.0.body.content.lock().is_some()
    }

    pub fn content_wire(&self) -> Option<Wire> {
        self.0.body.content.lock().clone()
    }

    /// The content wire, lazily allocated.
    pub fn make_content(&self) -> Wire {
        self.0
            .body
            .content
            .lock()
            .get_or_insert_with(Wire::new)
            .clone()
    }

    pub fn assign_content(&self, text: &str) {
        self.make_content().assign(text);
    }

    pub fn append_content(&self, text: &str) {
        self.make_content().append(text);
    }

    pub fn append_wire(&self, wire: &Wire) {
        self.make_content().append_wire(wire);
    }

    /// Append the content into `into`; false when there is none.
    pub fn copy_content(&self, into: &mut String) -> bool {
        match self.content_wire() {
            Some(wire) => {
                wire.print_into(into);
                true
            }
            None => false,
        }
    }

    pub fn content_string(&self) -> Option<String> {
        self.content_wire().map(|w| w.snapshot())
    }

    // ---- children ----------------------------------------------------

    /// Append `child` at the tail and index it by name. A gene is held at
    /// most once per parent; the owner link is claimed only when the child
    /// has no current owner.
    pub fn add_gene(&self, child: &Gene) {
        if self.same(child) {
            return;
        }
        {
            let mut kids = self.0.body.kids.lock();
            if kids.list.iter().any(|g| g.same(child)) {
                return;
            }
            kids.list.push(child.clone());
            kids.by_name
                .entry(child.name().clone())
                .or_default()
                .push(child.clone());
        }
        let mut owner = child.0.body.owner.lock();
        if owner.upgrade().is_none() {
            *owner = Arc::downgrade(&self.0);
        }
    }

    /// Eldest child.
    pub fn first(&self) -> Option<Gene> {
        self.0.body.kids.lock().list.first().cloned()
    }

    /// Eldest child with the given name.
    pub fn get_first(&self, name: &str) -> Option<Gene> {
        self.0
            .body
            .kids
            .lock()
            .by_name
            .get(name)
            .and_then(|chain| chain.first())
            .cloned()
    }

    /// Every child with the given name, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<Gene> {
        self.0
            .body
            .kids
            .lock()
            .by_name
            .get(name)
            .map(|chain| chain.to_vec())
            .unwrap_or_default()
    }

    /// The first child of that name, created if absent.
    pub fn make_one(&self, name: &str) -> Gene {
        if let Some(found) = self.get_first(name) {
            return found;
        }
        Gene::new_in(self, Cord::from(name), None)
    }

    /// Like [`make_one`](Gene::make_one), also reporting whether the child
    /// had to be created.
    pub fn make_one_gene(&self, name: &str) -> (Gene, bool) {
        if let Some(found) = self.get_first(name) {
            return (found, false);
        }
        (Gene::new_in(self, Cord::from(name), None), true)
    }

    /// Detach `child`, clearing its owner link. Returns false when it was
    /// not a child of this gene.
    pub fn remove_gene(&self, child: &Gene) -> bool {
        {
            let mut kids = self.0.body.kids.lock();
            let Some(at) = kids.list.iter().position(|g| g.same(child)) else {
                return false;
            };
            kids.list.remove(at);
            let emptied = match kids.by_name.get_mut(child.name().as_str()) {
                Some(chain) => {
                    if let Some(i) = chain.iter().position(|g| g.same(child)) {
                        chain.remove(i);
                    }
                    chain.is_empty()
                }
                None => false,
            };
            if emptied {
                kids.by_name.remove(child.name().as_str());
            }
        }
        *child.0.body.owner.lock() = Weak::new();
        true
    }

    /// Remove the first child named `name` if present, then add
    /// `replacement`. True when something was replaced.
    pub fn replace_gene(&self, name: &str, replacement: &Gene) -> bool {
        let evicted = match self.get_first(name) {
            Some(old) => self.remove_gene(&old),
            None => false,
        };
        self.add_gene(replacement);
        evicted
    }

    pub fn has_children(&self) -> bool {
        !self.0.body.kids.lock().list.is_empty()
    }

    pub fn children_count(&self) -> usize {
        self.0.body.kids.lock().list.len()
    }

    /// Stable snapshot of the children in order; mutation during iteration
    /// cannot invalidate it.
    pub fn stable_genes(&self) -> Vec<Gene> {
        self.0.body.kids.lock().list.clone()
    }

    /// Shallow alias: shares content, children and owner, carries an
    /// independent copy of the traits.
    pub fn duplicate(&self) -> Gene {
        let traits = self.0.traits.lock().clone();
        let gene = Gene::build(
            self.0.name.clone(),
            self.0.space.clone(),
            self.0.body.clone(),
            traits,
        );
        gene.0.flags.set(Flag::Duplicate);
        gene
    }

    /// Add every child of `other` (from a stable snapshot), append its
    /// content, then clone its traits over.
    pub fn absorb(&self, other: &Gene) {
        for child in other.stable_genes() {
            self.add_gene(&child);
        }
        if let Some(wire) = other.content_wire() {
            self.append_wire(&wire);
        }
        self.absorb_traits(other);
    }

    /// Clear content, traits and children. Detached children lose their
    /// owner links.
    pub fn deflate(&self) {
        *self.0.body.content.lock() = None;
        self.0.traits.lock().clear();
        let orphans: Vec<Gene> = {
            let mut kids = self.0.body.kids.lock();
            kids.by_name.clear();
            kids.list.drain(..).collect()
        };
        for child in orphans {
            let mut owner = child.0.body.owner.lock();
            if owner.upgrade().map(|o| Arc::ptr_eq(&o, &self.0)).unwrap_or(false) {
                *owner = Weak::new();
            }
        }
    }

    // ---- serialization ----------------------------------------------

    /// XML-serialize into `out`. `depth` counts generations: 1 prints the
    /// element alone, 2 adds its children, and 0 the whole tree.
    pub fn print_into(&self, out: &mut String, depth: i32) {
        let mut builder = XmlBuilder::open(&self.0.name, self.0.space.as_deref(), out);
        for (name, value) in self.traits_snapshot() {
            builder.attribute(out, &name, &value);
        }
        if let Some(content) = self.content_string() {
            builder.close_attributes(out);
            out.push_str(&content);
        }
        if depth != 1 {
            let kids = self.stable_genes();
            if !kids.is_empty() {
                builder.close_attributes(out);
                for child in kids {
                    child.print_into(out, depth.saturating_sub(1));
                }
            }
        }
        builder.close(out);
    }

    pub fn xml_string(&self) -> String {
        let mut out = String::new();
        self.print_into(&mut out, 0);
        out
    }

    /// Structural equality over name, space, traits (values and order),
    /// content and children, recursively.
    pub fn deep_eq(&self, other: &Gene) -> bool {
        if self.0.name != other.0.name || self.0.space != other.0.space {
            return false;
        }
        if self.traits_snapshot() != other.traits_snapshot() {
            return false;
        }
        if self.content_string().unwrap_or_default() != other.content_string().unwrap_or_default()
        {
            return false;
        }
        let ours = self.stable_genes();
        let theirs = other.stable_genes();
        ours.len() == theirs.len()
            && ours.iter().zip(&theirs).all(|(a, b)| a.deep_eq(b))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_lookup_returns_the_eldest() {
        let root = Gene::new("root");
        let a1 = Gene::new_in(&root, "a", None);
        let _b = Gene::new_in(&root, "b", None);
        let a2 = Gene::new_in(&root, "a", None);
        assert!(root.get_first("a").unwrap().same(&a1));
        let all = root.get_all("a");
        assert_eq!(all.len(), 2);
        assert!(all[1].same(&a2));
    }

    #[test]
    fn remove_clears_the_owner_link() {
        let root = Gene::new("root");
        let child = Gene::new_in(&root, "c", None);
        assert!(child.owner().unwrap().same(&root));
        assert!(root.remove_gene(&child));
        assert!(child.owner().is_none());
        assert!(!root.remove_gene(&child));
    }

    #[test]
    fn trait_upsert_preserves_first_insertion_order() {
        let gene = Gene::new("g");
        gene.trait_set("one", "1");
        gene.trait_set("two", "2");
        gene.trait_set("one", "updated");
        let traits = gene.traits_snapshot();
        assert_eq!(traits[0].0.as_str(), "one");
        assert_eq!(traits[0].1, "updated");
        assert_eq!(traits[1].0.as_str(), "two");
    }

    #[test]
    fn duplicates_share_structure_but_not_traits() {
        let gene = Gene::new("g");
        gene.trait_set("k", "v");
        gene.assign_content("body");
        let child = Gene::new_in(&gene, "c", None);
        let dupe = gene.duplicate();
        assert!(dupe.is_duplicate());

        dupe.trait_set("k", "changed");
        assert_eq!(gene.trait_get("k").unwrap(), "v");

        dupe.append_content("!");
        assert_eq!(gene.content_string().unwrap(), "body!");
        assert!(dupe.get_first("c").unwrap().same(&child));
    }

    #[test]
    fn absorb_copies_children_content_and_traits() {
        let target = Gene::new("t");
        let source = Gene::new("s");
        source.trait_set("k", "v");
        source.assign_content("text");
        let kid = Gene::new_in(&source, "kid", None);
        target.absorb(&source);
        assert!(target.get_first("kid").unwrap().same(&kid));
        assert_eq!(target.content_string().unwrap(), "text");
        assert_eq!(target.trait_get("k").unwrap(), "v");
        // the child is still owned by the source
        assert!(kid.owner().unwrap().same(&source));
    }

    #[test]
    fn make_one_creates_then_reuses() {
        let root = Gene::new("root");
        let first = root.make_one("slot");
        let again = root.make_one("slot");
        assert!(first.same(&again));
        assert_eq!(root.children_count(), 1);
    }

    #[test]
    fn deflate_empties_everything() {
        let root = Gene::new("root");
        root.trait_set("k", "v");
        root.assign_content("text");
        let child = Gene::new_in(&root, "c", None);
        root.deflate();
        assert!(!root.has_children());
        assert!(!root.has_traits());
        assert!(root.content_string().is_none());
        assert!(child.owner().is_none());
    }

    #[test]
    fn detached_subtrees_are_reclaimed() {
        let root = Gene::new("root");
        let child = Gene::new_in(&root, "c", None);
        let leaf = Gene::new_in(&child, "leaf", None);
        let (child_weak, leaf_weak) = (child.downgrade(), leaf.downgrade());
        drop(child);
        drop(leaf);
        // the tree keeps them alive
        assert!(child_weak.upgrade().is_some());
        assert!(leaf_weak.upgrade().is_some());
        drop(root);
        assert!(child_weak.upgrade().is_none());
        assert!(leaf_weak.upgrade().is_none());
    }
}
