use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use jdescriptor::MethodDescriptor;

use crate::flow::BlockGraph;

/// JVM access-flag bitmask constants shared by classes, methods, and fields.
pub(crate) mod access {
    pub(crate) const ACC_PUBLIC: u16 = 0x0001;
    pub(crate) const ACC_STATIC: u16 = 0x0008;
    pub(crate) const ACC_FINAL: u16 = 0x0010;
    pub(crate) const ACC_BRIDGE: u16 = 0x0040;
    pub(crate) const ACC_INTERFACE: u16 = 0x0200;
    pub(crate) const ACC_ABSTRACT: u16 = 0x0400;
    pub(crate) const ACC_SYNTHETIC: u16 = 0x1000;
    pub(crate) const ACC_ANNOTATION: u16 = 0x2000;
    pub(crate) const ACC_ENUM: u16 = 0x4000;
}

/// Stable index of a class inside its owning [`ClassGroup`].
pub(crate) type ClassId = usize;

/// Intermediate representation for one type of a program version.
///
/// Relations (`parent`, `interfaces`, `children`, `implementers`,
/// `hierarchy`) are id-based and populated once by [`ClassGroup::resolve`]
/// before any classification starts; they are never resolved lazily during
/// a comparison.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) access: u16,
    /// Loaded from the analyzed input. Stubs created for referenced-but-absent
    /// types (e.g. `java/lang/Object`) are not real.
    pub(crate) real: bool,
    pub(crate) super_name: Option<String>,
    pub(crate) interface_names: Vec<String>,
    pub(crate) methods: Vec<Method>,
    pub(crate) fields: Vec<Field>,
    pub(crate) parent: Option<ClassId>,
    pub(crate) interfaces: Vec<ClassId>,
    pub(crate) children: Vec<ClassId>,
    pub(crate) implementers: Vec<ClassId>,
    /// Ancestor chain, nearest first.
    pub(crate) hierarchy: Vec<ClassId>,
}

impl Class {
    pub(crate) fn new(
        name: String,
        access: u16,
        super_name: Option<String>,
        interface_names: Vec<String>,
        methods: Vec<Method>,
        fields: Vec<Field>,
    ) -> Self {
        Self {
            name,
            access,
            real: true,
            super_name,
            interface_names,
            methods,
            fields,
            parent: None,
            interfaces: Vec::new(),
            children: Vec::new(),
            implementers: Vec::new(),
            hierarchy: Vec::new(),
        }
    }

    /// Placeholder for a type referenced by the input but not contained in it.
    pub(crate) fn stub(name: String) -> Self {
        let mut class = Self::new(name, 0, None, Vec::new(), Vec::new(), Vec::new());
        class.real = false;
        class
    }
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) desc: MethodDescriptor,
    pub(crate) access: u16,
    /// Provably not synthetic or bridge and carrying a body.
    pub(crate) real: bool,
    pub(crate) insns: Vec<Insn>,
    /// Basic-block graph built once at load time; `None` when block
    /// construction failed for this method.
    pub(crate) flow: Option<BlockGraph>,
}

/// Intermediate representation for a field.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: u16,
}

/// Decoded bytecode instruction with index-based control flow.
#[derive(Clone, Debug)]
pub(crate) struct Insn {
    pub(crate) opcode: u8,
    pub(crate) kind: InsnKind,
    /// Some jump, switch, or exception handler targets this instruction.
    pub(crate) label_target: bool,
}

/// Control-flow classification of an instruction. Targets are instruction
/// indices, not byte offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum InsnKind {
    Jump { target: usize, conditional: bool },
    Switch { targets: Vec<usize> },
    /// Returns and throws; execution never falls through.
    Exit,
    Other,
}

/// All classes of one program version, referenced by stable [`ClassId`].
#[derive(Clone, Debug, Default)]
pub(crate) struct ClassGroup {
    classes: Vec<Class>,
    by_name: BTreeMap<String, ClassId>,
}

impl ClassGroup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, class: Class) -> Result<ClassId> {
        if self.by_name.contains_key(&class.name) {
            anyhow::bail!("duplicate class {}", class.name);
        }
        let id = self.classes.len();
        self.by_name.insert(class.name.clone(), id);
        self.classes.push(class);
        Ok(id)
    }

    pub(crate) fn get(&self, id: ClassId) -> &Class {
        &self.classes[id]
    }

    pub(crate) fn find(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        0..self.classes.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Resolve all hierarchy relations eagerly: create stubs for supers and
    /// interfaces outside the group, link parents and interfaces by id, and
    /// derive children, implementers, and ancestor chains.
    ///
    /// Fails on a cycle through super-class edges; interface edges may form
    /// a DAG.
    pub(crate) fn resolve(&mut self) -> Result<()> {
        let mut missing: Vec<String> = Vec::new();
        for class in &self.classes {
            for name in class.super_name.iter().chain(class.interface_names.iter()) {
                if !self.by_name.contains_key(name) && !missing.contains(name) {
                    missing.push(name.clone());
                }
            }
        }
        for name in missing {
            self.add(Class::stub(name))?;
        }

        for id in 0..self.classes.len() {
            let parent = self.classes[id]
                .super_name
                .as_ref()
                .and_then(|name| self.by_name.get(name).copied());
            let interfaces: Vec<ClassId> = self.classes[id]
                .interface_names
                .iter()
                .filter_map(|name| self.by_name.get(name).copied())
                .collect();
            let class = &mut self.classes[id];
            class.parent = parent;
            class.interfaces = interfaces;
            class.children.clear();
            class.implementers.clear();
            class.hierarchy.clear();
        }

        for id in 0..self.classes.len() {
            if let Some(parent) = self.classes[id].parent {
                self.classes[parent].children.push(id);
            }
            let interfaces = self.classes[id].interfaces.clone();
            for interface in interfaces {
                self.classes[interface].implementers.push(id);
            }
        }

        for id in 0..self.classes.len() {
            let mut chain = Vec::new();
            let mut cursor = self.classes[id].parent;
            while let Some(ancestor) = cursor {
                if ancestor == id || chain.len() > self.classes.len() {
                    anyhow::bail!("super-class cycle involving {}", self.classes[id].name);
                }
                chain.push(ancestor);
                cursor = self.classes[ancestor].parent;
            }
            self.classes[id].hierarchy = chain;
        }

        Ok(())
    }
}

/// Cheap copyable handle to a class inside a resolved group, giving
/// classifiers access to relations without ownership cycles.
#[derive(Clone, Copy)]
pub(crate) struct ClassRef<'a> {
    pub(crate) group: &'a ClassGroup,
    pub(crate) id: ClassId,
}

impl<'a> ClassRef<'a> {
    pub(crate) fn cls(self) -> &'a Class {
        self.group.get(self.id)
    }

    pub(crate) fn name(self) -> &'a str {
        &self.cls().name
    }

    pub(crate) fn access(self) -> u16 {
        self.cls().access
    }

    pub(crate) fn is_real(self) -> bool {
        self.cls().real
    }

    pub(crate) fn methods(self) -> &'a [Method] {
        &self.cls().methods
    }

    pub(crate) fn fields(self) -> &'a [Field] {
        &self.cls().fields
    }

    pub(crate) fn parent(self) -> Option<ClassRef<'a>> {
        self.cls().parent.map(|id| ClassRef {
            group: self.group,
            id,
        })
    }

    pub(crate) fn children(self) -> Vec<ClassRef<'a>> {
        self.refs(&self.cls().children)
    }

    pub(crate) fn interfaces(self) -> Vec<ClassRef<'a>> {
        self.refs(&self.cls().interfaces)
    }

    pub(crate) fn implementers(self) -> Vec<ClassRef<'a>> {
        self.refs(&self.cls().implementers)
    }

    pub(crate) fn hierarchy_len(self) -> usize {
        self.cls().hierarchy.len()
    }

    fn refs(self, ids: &[ClassId]) -> Vec<ClassRef<'a>> {
        ids.iter()
            .map(|&id| ClassRef {
                group: self.group,
                id,
            })
            .collect()
    }
}

impl PartialEq for ClassRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::eq(self.group, other.group)
    }
}

impl fmt::Debug for ClassRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassRef({})", self.name())
    }
}
