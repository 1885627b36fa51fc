//! Translates the spec's namespace-type list into the `clone(2)` flag set
//! the parent passes when spawning the container's init process.

use nix::sched::CloneFlags;

use crate::spec::NamespaceType;

fn flag_for(namespace_type: NamespaceType) -> CloneFlags {
    match namespace_type {
        NamespaceType::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceType::Mount => CloneFlags::CLONE_NEWNS,
        NamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceType::Network => CloneFlags::CLONE_NEWNET,
        NamespaceType::User => CloneFlags::CLONE_NEWUSER,
        NamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        NamespaceType::Time => CloneFlags::CLONE_NEWTIME,
    }
}

/// Folds the spec's requested namespace list into a single `CloneFlags` value.
pub fn clone_flags(namespaces: &[crate::spec::Namespace]) -> CloneFlags {
    namespaces
        .iter()
        .fold(CloneFlags::empty(), |flags, ns| flags | flag_for(ns.typ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Namespace;

    #[test]
    fn folds_namespace_list_into_clone_flags() {
        let namespaces = vec![
            Namespace {
                typ: NamespaceType::Pid,
            },
            Namespace {
                typ: NamespaceType::Mount,
            },
            Namespace {
                typ: NamespaceType::Network,
            },
        ];
        let flags = clone_flags(&namespaces);
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn empty_namespace_list_is_empty_flags() {
        assert_eq!(clone_flags(&[]), CloneFlags::empty());
    }

    quickcheck! {
        fn never_sets_a_flag_for_an_unrequested_type(requested: Vec<u8>) -> bool {
            let all_types = [
                NamespaceType::Pid,
                NamespaceType::Uts,
                NamespaceType::Mount,
                NamespaceType::Ipc,
                NamespaceType::Network,
                NamespaceType::User,
                NamespaceType::Cgroup,
                NamespaceType::Time,
            ];
            let chosen: Vec<Namespace> = requested
                .iter()
                .map(|b| Namespace { typ: all_types[(*b as usize) % all_types.len()] })
                .collect();
            let flags = clone_flags(&chosen);
            all_types.iter().all(|t| {
                let present = chosen.iter().any(|ns| ns.typ == *t);
                flags.contains(flag_for(*t)) == present
            })
        }
    }
}
