use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Dequeues allowed per entity between two visits to Idle.
    pub schedule_quota: u32,
    /// Outgoing backlog above which admission is refused.
    pub send_list_high_water: usize,
    /// Pause producer subscriptions toward destinations while they are Full.
    pub pause_subscriptions_while_full: bool,
    /// Non-fatal hardware status errors logged per entity before going quiet.
    pub hal_error_log_limit: u32,
    /// Maximum data objects in flight; creation fails beyond it.
    pub max_data_objs: usize,
    /// Hand the original buffer to the last remaining recipient instead of a copy.
    pub zero_copy_single_recipient: bool,
    /// Steps after which a pending external decision is reported overdue.
    pub decision_timeout_steps: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            schedule_quota: 64,
            send_list_high_water: 128,
            pause_subscriptions_while_full: false,
            hal_error_log_limit: 3,
            max_data_objs: 65_536,
            zero_copy_single_recipient: false,
            decision_timeout_steps: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DispatchConfig;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.schedule_quota, 64);
        assert_eq!(cfg.send_list_high_water, 128);
        assert!(!cfg.pause_subscriptions_while_full);
        assert_eq!(cfg.hal_error_log_limit, 3);
        assert!(!cfg.zero_copy_single_recipient);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let cfg: DispatchConfig = toml::from_str(
            r#"
            schedule_quota = 4
            pause_subscriptions_while_full = true
            "#,
        )
        .expect("config should parse");
        assert_eq!(
            cfg,
            DispatchConfig {
                schedule_quota: 4,
                pause_subscriptions_while_full: true,
                ..Default::default()
            }
        );
    }
}
