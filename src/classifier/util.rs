use jdescriptor::TypeDescriptor;

use crate::ir::{ClassRef, Method, access};

/// Count similarity of two sizes: 1.0 when equal (including 0, 0), degrading
/// toward 0 as the relative gap grows. Symmetric.
pub(crate) fn compare_counts(a: usize, b: usize) -> f64 {
    1.0 - a.abs_diff(b) as f64 / a.max(b).max(1) as f64
}

/// Set similarity of two class sets: the mean of the size count-similarity
/// and the proportion of the smaller set's members that find at least one
/// pre-filter-compatible counterpart in the other set. 1.0 when both are
/// empty.
pub(crate) fn compare_class_sets(a: &[ClassRef<'_>], b: &[ClassRef<'_>]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let size_score = compare_counts(a.len(), b.len());
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let matchable = if small.is_empty() {
        0.0
    } else {
        let matched = small
            .iter()
            .filter(|member| {
                large
                    .iter()
                    .any(|other| classes_potentially_equal(**member, *other))
            })
            .count();
        matched as f64 / small.len() as f64
    };
    (size_score + matchable) / 2.0
}

/// Cheap O(1) compatibility check between two classes, used to prune
/// candidates before weighted scoring and to bound recursive sub-comparisons
/// of related classes. Never recurses into full scoring.
pub(crate) fn classes_potentially_equal(a: ClassRef<'_>, b: ClassRef<'_>) -> bool {
    match (a.is_real(), b.is_real()) {
        // obfuscated names carry no information; only the interface split is
        // structural
        (true, true) => (a.access() ^ b.access()) & access::ACC_INTERFACE == 0,
        // stub names are stable library names and must agree exactly
        (false, false) => a.name() == b.name(),
        _ => false,
    }
}

/// Cheap compatibility check between two methods: static and abstract bits
/// must agree, and special names (`<init>`, `<clinit>`) only match the same
/// special name.
pub(crate) fn methods_potentially_equal(a: &Method, b: &Method) -> bool {
    if (a.access ^ b.access) & (access::ACC_STATIC | access::ACC_ABSTRACT) != 0 {
        return false;
    }
    if a.name.starts_with('<') || b.name.starts_with('<') {
        return a.name == b.name;
    }
    true
}

pub(crate) fn return_types_potentially_equal(a: &Method, b: &Method) -> bool {
    types_shape_compatible(a.desc.return_type(), b.desc.return_type())
}

pub(crate) fn arg_types_potentially_equal(a: &Method, b: &Method) -> bool {
    let params_a = a.desc.parameter_types();
    let params_b = b.desc.parameter_types();
    params_a.len() == params_b.len()
        && params_a
            .iter()
            .zip(params_b.iter())
            .all(|(left, right)| types_shape_compatible(left, right))
}

/// Primitives must match exactly; reference types, whose names are
/// obfuscated, are mutually compatible.
fn types_shape_compatible(a: &TypeDescriptor, b: &TypeDescriptor) -> bool {
    if is_reference_type(a) && is_reference_type(b) {
        return true;
    }
    a == b
}

fn is_reference_type(ty: &TypeDescriptor) -> bool {
    matches!(ty, TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use jdescriptor::MethodDescriptor;

    use super::*;
    use crate::ir::{Class, ClassGroup};

    fn method(name: &str, descriptor: &str, access: u16) -> Method {
        Method {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            desc: MethodDescriptor::from_str(descriptor).expect("descriptor"),
            access,
            real: false,
            insns: Vec::new(),
            flow: None,
        }
    }

    #[test]
    fn compare_counts_is_symmetric_and_reflexive() {
        for (a, b) in [(0, 0), (1, 4), (7, 7), (3, 0)] {
            assert_eq!(compare_counts(a, b), compare_counts(b, a));
        }
        for k in 0..5 {
            assert_eq!(compare_counts(k, k), 1.0);
        }
        assert_eq!(compare_counts(0, 3), 0.0);
        assert!((compare_counts(2, 4) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn class_sets_reward_matchable_members() {
        let mut group = ClassGroup::new();
        group
            .add(Class::new(
                "a/A".to_string(),
                0,
                None,
                Vec::new(),
                Vec::new(),
                Vec::new(),
            ))
            .expect("add concrete");
        group
            .add(Class::new(
                "a/I".to_string(),
                access::ACC_INTERFACE,
                None,
                Vec::new(),
                Vec::new(),
                Vec::new(),
            ))
            .expect("add interface");
        let concrete = ClassRef { group: &group, id: 0 };
        let interface = ClassRef { group: &group, id: 1 };

        assert_eq!(compare_class_sets(&[], &[]), 1.0);
        assert_eq!(compare_class_sets(&[concrete], &[concrete]), 1.0);
        // equal sizes but no compatible counterpart
        assert_eq!(compare_class_sets(&[concrete], &[interface]), 0.5);
        assert_eq!(compare_class_sets(&[concrete], &[]), 0.0);
    }

    #[test]
    fn stub_classes_match_by_name_only() {
        let mut group = ClassGroup::new();
        group.add(Class::stub("java/lang/Object".to_string())).expect("stub");
        group.add(Class::stub("java/util/List".to_string())).expect("stub");
        group
            .add(Class::new(
                "a/A".to_string(),
                0,
                None,
                Vec::new(),
                Vec::new(),
                Vec::new(),
            ))
            .expect("real");
        let object = ClassRef { group: &group, id: 0 };
        let list = ClassRef { group: &group, id: 1 };
        let real = ClassRef { group: &group, id: 2 };

        assert!(classes_potentially_equal(object, object));
        assert!(!classes_potentially_equal(object, list));
        assert!(!classes_potentially_equal(object, real));
    }

    #[test]
    fn static_methods_never_match_instance_methods() {
        let stat = method("a", "()V", access::ACC_STATIC);
        let inst = method("b", "()V", 0);

        assert!(!methods_potentially_equal(&stat, &inst));
        assert!(methods_potentially_equal(&stat, &stat));
    }

    #[test]
    fn special_names_only_match_themselves() {
        let ctor = method("<init>", "()V", 0);
        let clinit = method("<clinit>", "()V", access::ACC_STATIC);
        let plain = method("a", "()V", 0);

        assert!(methods_potentially_equal(&ctor, &ctor));
        assert!(!methods_potentially_equal(&ctor, &plain));
        assert!(!methods_potentially_equal(&ctor, &clinit));
    }

    #[test]
    fn type_shapes_compare_primitives_exactly_and_references_loosely() {
        let int_to_int = method("a", "(I)I", 0);
        let long_to_int = method("b", "(J)I", 0);
        let obj_to_obj = method("c", "(Ljava/lang/String;)Ljava/util/List;", 0);
        let other_obj = method("d", "(La/B;)La/C;", 0);

        assert!(arg_types_potentially_equal(&int_to_int, &int_to_int));
        assert!(!arg_types_potentially_equal(&int_to_int, &long_to_int));
        assert!(return_types_potentially_equal(&int_to_int, &long_to_int));
        assert!(arg_types_potentially_equal(&obj_to_obj, &other_obj));
        assert!(return_types_potentially_equal(&obj_to_obj, &other_obj));
        assert!(!return_types_potentially_equal(&int_to_int, &obj_to_obj));
    }

    #[test]
    fn parameter_counts_must_agree() {
        let one = method("a", "(I)V", 0);
        let two = method("b", "(II)V", 0);

        assert!(!arg_types_potentially_equal(&one, &two));
    }
}
