// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The object tree: every type the compile knows about, with its variable,
//! proc, and global-slot tables, plus the interned string and resource tables
//! shared by all bytecode. Types are created lazily on first reference and
//! accumulate members as the code tree resolves declarations; they are never
//! removed.

use ahash::AHashMap;
use indexmap::{IndexMap, IndexSet};

use dreamc_common::{ComplexValType, GlobalId, Location, ProcId, StringId, TypeId, TypePath};

use crate::expr::{Constant, Expr};
use crate::proc::Proc;

/// Deduplicating intern table. Ids are handed out in first-seen order and are
/// stable for the life of the compile, which is what makes string ids in
/// bytecode deterministic across identical runs.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: IndexSet<String>,
}

impl StringTable {
    pub fn intern(&mut self, text: &str) -> StringId {
        let (index, _) = self.strings.insert_full(text.to_string());
        StringId(index as u32)
    }

    pub fn resolve(&self, id: StringId) -> &str {
        self.strings
            .get_index(id.0 as usize)
            .map(String::as_str)
            .unwrap_or("<unknown string>")
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.strings.iter().cloned().collect()
    }
}

/// A variable declared on a type (or at global scope). Overrides do not get
/// one of these; they only replace the initial value.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableDecl {
    pub name: String,
    pub val_type: ComplexValType,
    pub is_const: bool,
    pub is_final: bool,
    pub is_tmp: bool,
    pub location: Location,
    /// The folded initial value. `None` when the initializer was lowered into
    /// an init proc, or when there was no initializer (implicit null).
    pub value: Option<Constant>,
}

/// One slot of the flat global-variable array.
#[derive(Debug)]
pub struct GlobalVariable {
    pub name: String,
    pub owner: TypeId,
    pub val_type: ComplexValType,
    pub is_const: bool,
    pub location: Location,
    pub value: Option<Constant>,
}

/// A deferred `field = value` evaluation belonging to a type's init proc.
#[derive(Debug)]
pub struct InitAssignment {
    pub field: String,
    pub value: Expr,
    pub location: Location,
}

/// One node of the type hierarchy. `parent` is a back-reference, not
/// ownership; the tree owns every node by path.
#[derive(Debug)]
pub struct ObjectType {
    pub id: TypeId,
    pub path: TypePath,
    pub parent: Option<TypeId>,
    /// False while an explicit `parent_type` assignment is still pending.
    pub resolved: bool,
    pub vars: IndexMap<String, VariableDecl>,
    /// Replacement initial values for vars declared on an ancestor.
    pub var_overrides: IndexMap<String, Constant>,
    /// Statics declared on this type, by slot in the global array.
    pub global_slots: IndexMap<String, GlobalId>,
    /// Per proc name, every definition in override order.
    pub procs: IndexMap<String, Vec<ProcId>>,
    pub verbs: Vec<ProcId>,
    /// Non-constant initializers, run in declaration order at instantiation.
    pub init_assignments: Vec<InitAssignment>,
    pub init_proc: Option<ProcId>,
}

impl ObjectType {
    fn new(id: TypeId, path: TypePath, parent: Option<TypeId>) -> Self {
        ObjectType {
            id,
            path,
            parent,
            resolved: true,
            vars: IndexMap::new(),
            var_overrides: IndexMap::new(),
            global_slots: IndexMap::new(),
            procs: IndexMap::new(),
            verbs: Vec::new(),
            init_assignments: Vec::new(),
            init_proc: None,
        }
    }
}

#[derive(Debug)]
pub struct ObjectTree {
    types: Vec<ObjectType>,
    paths: AHashMap<TypePath, TypeId>,
    globals: Vec<GlobalVariable>,
    procs: Vec<Proc>,
    global_procs: IndexMap<String, ProcId>,
    pub strings: StringTable,
    pub resources: StringTable,
}

impl Default for ObjectTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTree {
    pub const ROOT: TypeId = TypeId(0);

    pub fn new() -> Self {
        let root = ObjectType::new(Self::ROOT, TypePath::root(), None);
        let mut paths = AHashMap::new();
        paths.insert(TypePath::root(), Self::ROOT);
        ObjectTree {
            types: vec![root],
            paths,
            globals: Vec::new(),
            procs: Vec::new(),
            global_procs: IndexMap::new(),
            strings: StringTable::default(),
            resources: StringTable::default(),
        }
    }

    // ------------------------------------------------------------------
    // Types

    pub fn get(&self, id: TypeId) -> &ObjectType {
        &self.types[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut ObjectType {
        &mut self.types[id.0 as usize]
    }

    pub fn type_by_path(&self, path: &TypePath) -> Option<TypeId> {
        self.paths.get(path).copied()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn types(&self) -> impl Iterator<Item = &ObjectType> {
        self.types.iter()
    }

    /// Find or create the type at an absolute path, creating any missing
    /// ancestors along the way. Lazily created types take their lexical
    /// parent, which always exists by induction.
    pub fn get_or_create(&mut self, path: &TypePath) -> TypeId {
        debug_assert!(path.is_absolute(), "cannot create relative path {path}");
        if let Some(id) = self.paths.get(path) {
            return *id;
        }
        let parent = path.parent().map(|parent| self.get_or_create(&parent));
        let id = TypeId(self.types.len() as u32);
        tracing::trace!(%path, id = id.0, "creating type");
        self.types.push(ObjectType::new(id, path.clone(), parent));
        self.paths.insert(path.clone(), id);
        id
    }

    pub fn set_parent(&mut self, id: TypeId, parent: TypeId) {
        let ty = self.get_mut(id);
        ty.parent = Some(parent);
        ty.resolved = true;
    }

    /// Mark a type as awaiting an explicit `parent_type` assignment.
    pub fn mark_unresolved(&mut self, id: TypeId) {
        self.get_mut(id).resolved = false;
    }

    /// Give up on a pending `parent_type`; the type keeps its lexical parent.
    pub fn mark_resolved(&mut self, id: TypeId) {
        self.get_mut(id).resolved = true;
    }

    /// Whether `child` is `ancestor` or inherits from it, following the
    /// resolved parent chain rather than path prefixes (an explicit
    /// `parent_type` can reparent a type away from its lexical ancestor).
    pub fn is_subtype(&self, child: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(child);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).parent;
        }
        false
    }

    /// Resolve a relative path against a context type, walking upward through
    /// its ancestors when no direct child matches. Only finds existing types.
    pub fn upward_search(&self, from: TypeId, relative: &TypePath) -> Option<TypeId> {
        let mut context = Some(from);
        while let Some(id) = context {
            let candidate = self.get(id).path.combine(relative);
            if let Some(found) = self.paths.get(&candidate) {
                return Some(*found);
            }
            context = self.get(id).parent;
        }
        None
    }

    // ------------------------------------------------------------------
    // Variables

    /// The declaring type and declaration of a var visible on `ty`, walking
    /// the parent chain. Overrides never affect the result; the declared type
    /// of a var always comes from its declaration.
    pub fn var_decl(&self, ty: TypeId, name: &str) -> Option<(TypeId, &VariableDecl)> {
        let mut current = Some(ty);
        while let Some(id) = current {
            if let Some(decl) = self.get(id).vars.get(name) {
                return Some((id, decl));
            }
            current = self.get(id).parent;
        }
        None
    }

    /// The constant initial value of a var as seen from `ty`: the nearest
    /// override wins over the declaration's own value.
    pub fn initial_value(&self, ty: TypeId, name: &str) -> Option<&Constant> {
        let mut current = Some(ty);
        while let Some(id) = current {
            let object = self.get(id);
            if let Some(value) = object.var_overrides.get(name) {
                return Some(value);
            }
            if let Some(decl) = object.vars.get(name) {
                return decl.value.as_ref();
            }
            current = object.parent;
        }
        None
    }

    /// The global slot for a static var visible on `ty`, walking the parent
    /// chain.
    pub fn global_slot(&self, ty: TypeId, name: &str) -> Option<GlobalId> {
        let mut current = Some(ty);
        while let Some(id) = current {
            if let Some(slot) = self.get(id).global_slots.get(name) {
                return Some(*slot);
            }
            current = self.get(id).parent;
        }
        None
    }

    /// Allocate the next free slot in the flat global array. Slots are never
    /// reused, so an index observed by any reference stays valid even while
    /// the variable's own initializer is still pending.
    pub fn allocate_global(
        &mut self,
        name: &str,
        owner: TypeId,
        val_type: ComplexValType,
        is_const: bool,
        location: Location,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalVariable {
            name: name.to_string(),
            owner,
            val_type,
            is_const,
            location,
            value: None,
        });
        id
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id.0 as usize]
    }

    pub fn set_global_value(&mut self, id: GlobalId, value: Constant) {
        self.globals[id.0 as usize].value = Some(value);
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    pub fn globals(&self) -> impl Iterator<Item = &GlobalVariable> {
        self.globals.iter()
    }

    // ------------------------------------------------------------------
    // Procs

    /// Create a proc and record it in its owner's overload table. Global
    /// procs (owned by the root type) also land in the global proc table.
    pub fn create_proc(&mut self, owner: TypeId, name: &str, location: Location) -> ProcId {
        let id = self.create_detached_proc(owner, name, location);
        self.get_mut(owner)
            .procs
            .entry(name.to_string())
            .or_default()
            .push(id);
        if owner == Self::ROOT {
            self.global_procs.entry(name.to_string()).or_insert(id);
        }
        id
    }

    /// Create a proc that is reachable only by id: init procs and other
    /// synthesized bodies that must not be callable by name.
    pub fn create_detached_proc(&mut self, owner: TypeId, name: &str, location: Location) -> ProcId {
        let id = ProcId(self.procs.len() as u32);
        self.procs.push(Proc::new(id, owner, name, location));
        id
    }

    pub fn proc(&self, id: ProcId) -> &Proc {
        &self.procs[id.0 as usize]
    }

    pub fn proc_mut(&mut self, id: ProcId) -> &mut Proc {
        &mut self.procs[id.0 as usize]
    }

    pub fn proc_count(&self) -> usize {
        self.procs.len()
    }

    pub fn procs(&self) -> impl Iterator<Item = &Proc> {
        self.procs.iter()
    }

    /// Remove a proc from the tree for compilation; [`ObjectTree::put_proc`]
    /// returns it. The slot holds a default placeholder in between.
    pub fn take_proc(&mut self, id: ProcId) -> Proc {
        std::mem::take(&mut self.procs[id.0 as usize])
    }

    pub fn put_proc(&mut self, id: ProcId, proc: Proc) {
        self.procs[id.0 as usize] = proc;
    }

    /// The newest definition of a proc visible on `ty`, walking the parent
    /// chain.
    pub fn lookup_proc(&self, ty: TypeId, name: &str) -> Option<ProcId> {
        let mut current = Some(ty);
        while let Some(id) = current {
            if let Some(overloads) = self.get(id).procs.get(name) {
                return overloads.last().copied();
            }
            current = self.get(id).parent;
        }
        None
    }

    /// Whether a proc named `name` is inherited from an ancestor of `ty`
    /// (not counting `ty`'s own definitions).
    pub fn proc_inherited(&self, ty: TypeId, name: &str) -> bool {
        match self.get(ty).parent {
            Some(parent) => self.lookup_proc(parent, name).is_some(),
            None => false,
        }
    }

    pub fn global_proc(&self, name: &str) -> Option<ProcId> {
        self.global_procs.get(name).copied()
    }

    pub fn global_procs(&self) -> impl Iterator<Item = (&String, ProcId)> {
        self.global_procs.iter().map(|(name, id)| (name, *id))
    }

    /// The fully qualified display name of a global proc, for disassembly.
    pub fn global_proc_name(&self, id: ProcId) -> Option<&str> {
        self.global_procs
            .iter()
            .find(|(_, proc)| **proc == id)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dreamc_common::ValType;

    fn decl(name: &str, value: Option<Constant>) -> VariableDecl {
        VariableDecl {
            name: name.to_string(),
            val_type: ValType::ANYTHING.into(),
            is_const: false,
            is_final: false,
            is_tmp: false,
            location: Location::INTERNAL,
            value,
        }
    }

    #[test]
    fn lazy_creation_builds_ancestors() {
        let mut tree = ObjectTree::new();
        let id = tree.get_or_create(&TypePath::from("/obj/item/sword"));
        assert_eq!(tree.get(id).path.to_string(), "/obj/item/sword");

        let item = tree.type_by_path(&TypePath::from("/obj/item")).unwrap();
        let obj = tree.type_by_path(&TypePath::from("/obj")).unwrap();
        assert_eq!(tree.get(id).parent, Some(item));
        assert_eq!(tree.get(item).parent, Some(obj));
        assert_eq!(tree.get(obj).parent, Some(ObjectTree::ROOT));
        assert!(tree.get(id).resolved);
    }

    #[test]
    fn subtype_follows_reparenting() {
        let mut tree = ObjectTree::new();
        let base = tree.get_or_create(&TypePath::from("/datum/base"));
        let other = tree.get_or_create(&TypePath::from("/obj/thing"));
        assert!(!tree.is_subtype(other, base));

        tree.set_parent(other, base);
        assert!(tree.is_subtype(other, base));
        assert!(tree.is_subtype(other, ObjectTree::ROOT));
    }

    #[test]
    fn var_lookup_walks_parent_chain() {
        let mut tree = ObjectTree::new();
        let mob = tree.get_or_create(&TypePath::from("/mob"));
        let enemy = tree.get_or_create(&TypePath::from("/mob/enemy"));
        tree.get_mut(mob)
            .vars
            .insert("health".to_string(), decl("health", Some(Constant::Number(100.0))));

        let (declared_on, _) = tree.var_decl(enemy, "health").unwrap();
        assert_eq!(declared_on, mob);
        assert_eq!(
            tree.initial_value(enemy, "health"),
            Some(&Constant::Number(100.0))
        );
    }

    #[test]
    fn override_wins_for_value_not_declaration() {
        let mut tree = ObjectTree::new();
        let mob = tree.get_or_create(&TypePath::from("/mob"));
        let enemy = tree.get_or_create(&TypePath::from("/mob/enemy"));
        tree.get_mut(mob)
            .vars
            .insert("health".to_string(), decl("health", Some(Constant::Number(100.0))));
        tree.get_mut(enemy)
            .var_overrides
            .insert("health".to_string(), Constant::Number(50.0));

        assert_eq!(
            tree.initial_value(enemy, "health"),
            Some(&Constant::Number(50.0))
        );
        assert_eq!(
            tree.initial_value(mob, "health"),
            Some(&Constant::Number(100.0))
        );
        // The declaration is still the base one.
        let (declared_on, _) = tree.var_decl(enemy, "health").unwrap();
        assert_eq!(declared_on, mob);
    }

    #[test]
    fn global_slots_are_monotonic() {
        let mut tree = ObjectTree::new();
        let a = tree.allocate_global(
            "a",
            ObjectTree::ROOT,
            ValType::ANYTHING.into(),
            false,
            Location::INTERNAL,
        );
        let b = tree.allocate_global(
            "b",
            ObjectTree::ROOT,
            ValType::ANYTHING.into(),
            false,
            Location::INTERNAL,
        );
        assert_eq!(a, GlobalId(0));
        assert_eq!(b, GlobalId(1));
    }

    #[test]
    fn upward_search_prefers_nearest_context() {
        let mut tree = ObjectTree::new();
        tree.get_or_create(&TypePath::from("/obj/item"));
        let machine = tree.get_or_create(&TypePath::from("/obj/machine"));
        let item = tree.type_by_path(&TypePath::from("/obj/item")).unwrap();

        let found = tree.upward_search(machine, &TypePath::from("item")).unwrap();
        assert_eq!(found, item);
        assert_eq!(tree.upward_search(machine, &TypePath::from("nothing")), None);
    }

    #[test]
    fn string_table_dedupes() {
        let mut strings = StringTable::default();
        let a = strings.intern("hello");
        let b = strings.intern("world");
        let c = strings.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(strings.resolve(b), "world");
        assert_eq!(strings.to_vec(), vec!["hello".to_string(), "world".to_string()]);
    }
}
