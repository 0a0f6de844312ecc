use crate::record::EntityRecord;

impl EntityRecord {
    /// The three-way merge of §4.4, applied when a record arriving from
    /// another node (or re-read from L3) may conflict with the local copy.
    ///
    /// `self` is *local*, `other` is *remote*. Returns `true` iff the merge
    /// changed local state, in which case `version` and
    /// `last_modified_millis` have already been bumped accordingly.
    ///
    /// # Panics
    ///
    /// Panics if `self.id() != other.id()` — merging unrelated records is a
    /// caller bug, not a recoverable runtime condition.
    pub fn merge_from(&mut self, other: &EntityRecord) -> bool {
        assert_eq!(
            self.id, other.id,
            "merge_from requires matching record ids"
        );

        let local_version_before_merge = self.version;
        let remote_is_at_least_as_new = other.version >= local_version_before_merge;
        let mut changed = false;

        // 1. Attribute add/update.
        for (k, v) in &other.attributes {
            if self.attributes.get(k) != Some(v) {
                self.attributes.insert(k.clone(), v.clone());
                changed = true;
            }
        }

        // 2. Attribute deletion, only when remote is not strictly older.
        if remote_is_at_least_as_new {
            let stale_keys: Vec<String> = self
                .attributes
                .keys()
                .filter(|k| !other.attributes.contains_key(*k))
                .cloned()
                .collect();
            for k in stale_keys {
                self.attributes.remove(&k);
                changed = true;
            }
        }

        // 3. Relationship union.
        for (key, remote_targets) in &other.relationships {
            let local_targets = self.relationships.entry(key.clone()).or_default();
            for target in remote_targets {
                if local_targets.insert(*target) {
                    changed = true;
                }
            }
        }

        // 4. Relationship deletion, only when remote is not strictly older.
        if remote_is_at_least_as_new {
            let stale_keys: Vec<String> = self
                .relationships
                .keys()
                .filter(|k| !other.relationships.contains_key(*k))
                .cloned()
                .collect();
            for k in stale_keys {
                self.relationships.remove(&k);
                changed = true;
            }

            for (key, remote_targets) in &other.relationships {
                if let Some(local_targets) = self.relationships.get_mut(key) {
                    let stale_targets: Vec<_> = local_targets
                        .iter()
                        .filter(|t| !remote_targets.contains(t))
                        .copied()
                        .collect();
                    for t in stale_targets {
                        local_targets.remove(&t);
                        changed = true;
                    }
                    if local_targets.is_empty() {
                        self.relationships.remove(key);
                    }
                }
            }
        }

        if changed {
            self.last_modified_millis = self.last_modified_millis.max(other.last_modified_millis);
            self.version = self.version.max(other.version) + 1;
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_base::EntityId;

    fn at_version(id: EntityId, version: u64) -> EntityRecord {
        let mut r = EntityRecord::new(id, "player");
        r.version = version;
        r
    }

    #[test]
    fn scenario_merge_convergence() {
        // §8 scenario 3.
        let id = EntityId::new();
        let mut local = at_version(id, 5);
        local.add_attribute("x", "1");
        local.version = 5;

        let mut remote = at_version(id, 7);
        remote.attributes.insert("x".into(), "2".into());
        remote.attributes.insert("y".into(), "3".into());

        let changed = local.merge_from(&remote);
        assert!(changed);
        assert_eq!(local.get_attribute("x"), Some("2"));
        assert_eq!(local.get_attribute("y"), Some("3"));
        assert_eq!(local.version(), 8);
    }

    #[test]
    fn scenario_deletion_visibility() {
        // §8 scenario 4.
        let id = EntityId::new();
        let mut local = at_version(id, 3);
        local.attributes.insert("x".into(), "1".into());
        local.attributes.insert("y".into(), "2".into());

        let mut remote = at_version(id, 4);
        remote.attributes.insert("x".into(), "1".into());

        let changed = local.merge_from(&remote);
        assert!(changed);
        assert_eq!(local.attributes().len(), 1);
        assert_eq!(local.get_attribute("x"), Some("1"));
        assert_eq!(local.get_attribute("y"), None);
        assert_eq!(local.version(), 5);
    }

    #[test]
    fn stale_remote_deletions_are_not_honored() {
        let id = EntityId::new();
        let mut local = at_version(id, 10);
        local.attributes.insert("x".into(), "1".into());
        local.attributes.insert("y".into(), "2".into());

        // Remote is strictly older and dropped "y" — a stale delete.
        let mut remote = at_version(id, 9);
        remote.attributes.insert("x".into(), "1".into());

        let changed = local.merge_from(&remote);
        // Remote brings no new attribute value and is older: no union change,
        // and deletions are not honored because remote.version < local.version.
        assert!(!changed);
        assert_eq!(local.get_attribute("y"), Some("2"));
        assert_eq!(local.version(), 10);
    }

    #[test]
    fn equal_version_deletions_are_still_honored() {
        let id = EntityId::new();
        let mut local = at_version(id, 5);
        local.attributes.insert("y".into(), "2".into());

        let remote = at_version(id, 5); // no attributes at all.

        let changed = local.merge_from(&remote);
        assert!(changed);
        assert_eq!(local.get_attribute("y"), None);
        assert_eq!(local.version(), 6);
    }

    #[test]
    fn merge_is_idempotent_on_re_apply() {
        let id = EntityId::new();
        let mut local = at_version(id, 1);
        let mut remote = at_version(id, 2);
        remote.attributes.insert("x".into(), "1".into());

        local.merge_from(&remote);
        let snapshot_attrs = local.attributes().clone();
        let snapshot_rels = local.relationships().clone();

        // Re-applying the same (now stale) remote must not further change
        // observable attribute/relationship state.
        local.merge_from(&remote);
        assert_eq!(local.attributes(), &snapshot_attrs);
        assert_eq!(local.relationships(), &snapshot_rels);
    }

    #[test]
    fn relationship_deletion_removes_shared_key_targets() {
        let id = EntityId::new();
        let a = EntityId::new();
        let b = EntityId::new();

        let mut local = at_version(id, 2);
        local.add_relationship("guild", a);
        local.add_relationship("guild", b);
        local.version = 2;

        let mut remote = at_version(id, 3);
        remote.relationships.entry("guild".into()).or_default().insert(a);

        let changed = local.merge_from(&remote);
        assert!(changed);
        assert_eq!(local.get_related_entities("guild"), [a].into_iter().collect());
    }

    #[test]
    #[should_panic(expected = "matching record ids")]
    fn merging_mismatched_ids_panics() {
        let mut local = EntityRecord::new(EntityId::new(), "player");
        let remote = EntityRecord::new(EntityId::new(), "player");
        local.merge_from(&remote);
    }
}
