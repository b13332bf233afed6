/// Secondary port to the policy rule reconciler.
///
/// Marking a rule dirty is fire-and-forget: the reconciler recomputes
/// the rule's address set (via the primary port's selector lookup) and
/// eventually reports the attempt through `notify_rule_realization`.
pub trait RuleReconcilerPort: Send + Sync {
    fn mark_rule_dirty(&self, rule_id: &str);
}
