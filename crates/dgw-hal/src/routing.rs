use dgw_core::{Direction, EntityKey, TableIndex};
use tracing::debug;

/// Static routing-table contract: producer identity to destination bindings.
pub trait RoutingTable {
    /// Ordered destinations bound to `src` in `table`.
    fn lookup_destinations(&self, src: &EntityKey, table: TableIndex) -> Vec<EntityKey>;
    /// Reports a quarantined entity so future lookups stop targeting it.
    fn mark_abnormal(&mut self, entity: &EntityKey, direction: Direction, table: TableIndex);
}

#[derive(Debug, Default, Clone)]
struct Relations {
    normal: Vec<(EntityKey, EntityKey)>,
    abnormal: Vec<(EntityKey, EntityKey)>,
}

impl Relations {
    fn move_to_abnormal(&mut self, hit: impl Fn(&(EntityKey, EntityKey)) -> bool) -> usize {
        let (moved, kept): (Vec<_>, Vec<_>) = self.normal.drain(..).partition(|pair| hit(pair));
        self.normal = kept;
        let count = moved.len();
        self.abnormal.extend(moved);
        count
    }

    fn move_to_normal(&mut self, hit: impl Fn(&(EntityKey, EntityKey)) -> bool) -> usize {
        let (moved, kept): (Vec<_>, Vec<_>) = self.abnormal.drain(..).partition(|pair| hit(pair));
        self.abnormal = kept;
        let count = moved.len();
        self.normal.extend(moved);
        count
    }
}

/// In-memory bind relation with one relation set per table index.
///
/// Marking an entity abnormal moves its relations aside; they are kept so
/// that an operator-driven restore can reinstate them.
#[derive(Debug, Default, Clone)]
pub struct BindRelation {
    tables: [Relations; 2],
}

impl BindRelation {
    /// Binds `src -> dst`. Refused if already bound or parked as abnormal.
    pub fn bind(&mut self, src: EntityKey, dst: EntityKey, table: TableIndex) -> bool {
        let relations = &mut self.tables[table.slot()];
        let pair = (src, dst);
        if relations.normal.contains(&pair) || relations.abnormal.contains(&pair) {
            return false;
        }
        relations.normal.push(pair);
        true
    }

    /// Removes `src -> dst` from both the normal and abnormal sets.
    pub fn unbind(&mut self, src: &EntityKey, dst: &EntityKey, table: TableIndex) -> bool {
        let relations = &mut self.tables[table.slot()];
        let before = relations.normal.len() + relations.abnormal.len();
        relations.normal.retain(|(s, d)| !(s == src && d == dst));
        relations.abnormal.retain(|(s, d)| !(s == src && d == dst));
        before != relations.normal.len() + relations.abnormal.len()
    }

    pub fn unbind_by_src(&mut self, src: &EntityKey, table: TableIndex) -> usize {
        let relations = &mut self.tables[table.slot()];
        let before = relations.normal.len() + relations.abnormal.len();
        relations.normal.retain(|(s, _)| s != src);
        relations.abnormal.retain(|(s, _)| s != src);
        before - (relations.normal.len() + relations.abnormal.len())
    }

    pub fn unbind_by_dst(&mut self, dst: &EntityKey, table: TableIndex) -> usize {
        let relations = &mut self.tables[table.slot()];
        let before = relations.normal.len() + relations.abnormal.len();
        relations.normal.retain(|(_, d)| d != dst);
        relations.abnormal.retain(|(_, d)| d != dst);
        before - (relations.normal.len() + relations.abnormal.len())
    }

    /// Destinations of `src` parked because of an abnormal mark.
    pub fn abnormal_src_to_dst(&self, src: &EntityKey, table: TableIndex) -> Vec<EntityKey> {
        self.tables[table.slot()]
            .abnormal
            .iter()
            .filter(|(s, _)| s == src)
            .map(|(_, d)| *d)
            .collect()
    }

    /// Sources of `dst` parked because of an abnormal mark.
    pub fn abnormal_dst_to_src(&self, dst: &EntityKey, table: TableIndex) -> Vec<EntityKey> {
        self.tables[table.slot()]
            .abnormal
            .iter()
            .filter(|(_, d)| d == dst)
            .map(|(s, _)| *s)
            .collect()
    }

    /// Reinstates relations parked for `entity`. Returns how many came back.
    pub fn restore(&mut self, entity: &EntityKey, direction: Direction, table: TableIndex) -> usize {
        let relations = &mut self.tables[table.slot()];
        match direction {
            Direction::Send => relations.move_to_normal(|(s, _)| s == entity),
            Direction::Recv => relations.move_to_normal(|(_, d)| d == entity),
        }
    }

    pub fn relation_count(&self, table: TableIndex) -> usize {
        self.tables[table.slot()].normal.len()
    }
}

impl RoutingTable for BindRelation {
    fn lookup_destinations(&self, src: &EntityKey, table: TableIndex) -> Vec<EntityKey> {
        self.tables[table.slot()]
            .normal
            .iter()
            .filter(|(s, _)| s == src)
            .map(|(_, d)| *d)
            .collect()
    }

    fn mark_abnormal(&mut self, entity: &EntityKey, direction: Direction, table: TableIndex) {
        let relations = &mut self.tables[table.slot()];
        let moved = match direction {
            Direction::Send => relations.move_to_abnormal(|(s, _)| s == entity),
            Direction::Recv => relations.move_to_abnormal(|(_, d)| d == entity),
        };
        debug!("marked {} abnormal, parked {} relations", entity, moved);
    }
}

#[cfg(test)]
mod tests {
    use super::{BindRelation, RoutingTable};
    use dgw_core::{Direction, EntityKey, TableIndex};

    fn keys() -> (EntityKey, EntityKey, EntityKey) {
        (
            EntityKey::send_queue(1, 0),
            EntityKey::recv_queue(2, 0),
            EntityKey::recv_queue(3, 0),
        )
    }

    #[test]
    fn lookup_preserves_bind_order_per_table() {
        let (src, a, b) = keys();
        let mut relation = BindRelation::default();
        assert!(relation.bind(src, b, TableIndex::Primary));
        assert!(relation.bind(src, a, TableIndex::Primary));
        assert!(!relation.bind(src, a, TableIndex::Primary));
        assert!(relation.bind(src, a, TableIndex::Extra));

        assert_eq!(relation.lookup_destinations(&src, TableIndex::Primary), vec![b, a]);
        assert_eq!(relation.lookup_destinations(&src, TableIndex::Extra), vec![a]);
        assert!(relation.lookup_destinations(&a, TableIndex::Primary).is_empty());
    }

    #[test]
    fn abnormal_dst_is_hidden_from_lookup_and_restorable() {
        let (src, a, b) = keys();
        let mut relation = BindRelation::default();
        relation.bind(src, a, TableIndex::Primary);
        relation.bind(src, b, TableIndex::Primary);

        relation.mark_abnormal(&a, Direction::Recv, TableIndex::Primary);
        assert_eq!(relation.lookup_destinations(&src, TableIndex::Primary), vec![b]);
        assert_eq!(relation.abnormal_dst_to_src(&a, TableIndex::Primary), vec![src]);
        assert!(!relation.bind(src, a, TableIndex::Primary));

        assert_eq!(relation.restore(&a, Direction::Recv, TableIndex::Primary), 1);
        assert_eq!(relation.lookup_destinations(&src, TableIndex::Primary), vec![b, a]);
    }

    #[test]
    fn abnormal_src_parks_all_outgoing_relations() {
        let (src, a, b) = keys();
        let mut relation = BindRelation::default();
        relation.bind(src, a, TableIndex::Primary);
        relation.bind(src, b, TableIndex::Primary);

        relation.mark_abnormal(&src, Direction::Send, TableIndex::Primary);
        assert!(relation.lookup_destinations(&src, TableIndex::Primary).is_empty());
        assert_eq!(relation.abnormal_src_to_dst(&src, TableIndex::Primary), vec![a, b]);

        assert!(relation.unbind(&src, &a, TableIndex::Primary));
        assert_eq!(relation.abnormal_src_to_dst(&src, TableIndex::Primary), vec![b]);
        assert_eq!(relation.unbind_by_src(&src, TableIndex::Primary), 1);
        assert_eq!(relation.relation_count(TableIndex::Primary), 0);
    }
}
