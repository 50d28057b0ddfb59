use crate::classifier::ClassifierSet;
use crate::classifier::util::{
    arg_types_potentially_equal, classes_potentially_equal, compare_class_sets, compare_counts,
    methods_potentially_equal, return_types_potentially_equal,
};
use crate::ir::{ClassRef, Method, access};

const TYPE_FLAG_MASK: u16 =
    access::ACC_ENUM | access::ACC_INTERFACE | access::ACC_ANNOTATION | access::ACC_ABSTRACT;

/// The weighted feature set used to compare two classes. Registration order
/// fixes the tie-break order of `rank` and must not be reordered.
pub(crate) fn class_classifier<'a>(max_mismatch: usize) -> ClassifierSet<ClassRef<'a>> {
    let mut set = ClassifierSet::new(classes_potentially_equal, max_mismatch);
    set.add_classifier("class type check", 20, class_type_check);
    set.add_classifier("hierarchy depth", 1, hierarchy_depth);
    set.add_classifier("parent class", 4, parent_class);
    set.add_classifier("child classes", 3, child_classes);
    set.add_classifier("interfaces", 3, interfaces);
    set.add_classifier("implementers", 2, implementers);
    set.add_classifier("method count", 3, method_count);
    set.add_classifier("field count", 3, field_count);
    set.add_classifier("hierarchy siblings", 2, hierarchy_siblings);
    set.add_classifier("similar methods", 10, similar_methods);
    set
}

/// Penalizes 0.25 per differing {ENUM, INTERFACE, ANNOTATION, ABSTRACT} flag.
fn class_type_check(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    let diff = ((a.access() ^ b.access()) & TYPE_FLAG_MASK).count_ones();
    1.0 - f64::from(diff) / 4.0
}

fn hierarchy_depth(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    compare_counts(a.hierarchy_len(), b.hierarchy_len())
}

fn parent_class(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    match (a.parent(), b.parent()) {
        (None, None) => 1.0,
        (Some(parent_a), Some(parent_b)) => {
            if classes_potentially_equal(parent_a, parent_b) {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn child_classes(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    compare_class_sets(&a.children(), &b.children())
}

fn interfaces(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    compare_class_sets(&a.interfaces(), &b.interfaces())
}

fn implementers(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    compare_class_sets(&a.implementers(), &b.implementers())
}

fn method_count(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    compare_counts(a.methods().len(), b.methods().len())
}

fn field_count(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    compare_counts(a.fields().len(), b.fields().len())
}

/// Compares how many children the parents have. Precondition: both classes
/// have a resolved parent; the mapping driver only admits such classes, and
/// a violation is a programming error.
fn hierarchy_siblings(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    let parent_a = a.parent().expect("hierarchy siblings requires a resolved parent");
    let parent_b = b.parent().expect("hierarchy siblings requires a resolved parent");
    compare_counts(parent_a.children().len(), parent_b.children().len())
}

/// Greedy one-to-one assignment of methods across the two classes, scored by
/// body similarity. Non-optimal by design: class comparison only needs an
/// approximate body-similarity signal, not exact method identity.
fn similar_methods(a: ClassRef<'_>, b: ClassRef<'_>) -> f64 {
    let methods_a = a.methods();
    let methods_b = b.methods();
    if methods_a.is_empty() && methods_b.is_empty() {
        return 1.0;
    }
    if methods_a.is_empty() || methods_b.is_empty() {
        return 0.0;
    }

    let mut unclaimed: Vec<usize> = (0..methods_b.len()).collect();
    let mut total = 0.0;
    for method_a in methods_a {
        let mut best_slot = None;
        let mut best_score = 0.0;
        for (slot, &index) in unclaimed.iter().enumerate() {
            let method_b = &methods_b[index];
            if !methods_potentially_equal(method_a, method_b) {
                continue;
            }
            if !return_types_potentially_equal(method_a, method_b) {
                continue;
            }
            if !arg_types_potentially_equal(method_a, method_b) {
                continue;
            }
            let score = method_pair_score(method_a, method_b);
            if score > best_score {
                best_score = score;
                best_slot = Some(slot);
            }
        }
        if let Some(slot) = best_slot {
            total += best_score;
            unclaimed.remove(slot);
        }
    }

    total / methods_a.len().max(methods_b.len()) as f64
}

fn method_pair_score(a: &Method, b: &Method) -> f64 {
    if a.real || b.real {
        return if a.real && b.real { 1.0 } else { 0.0 };
    }
    // without the real signal, compare body size; a method whose block graph
    // could not be built contributes nothing
    if a.flow.is_none() || b.flow.is_none() {
        return 0.0;
    }
    compare_counts(a.insns.len(), b.insns.len())
}
