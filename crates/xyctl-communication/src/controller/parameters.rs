//! Firmware parameter backup/restore and machine preferences

use super::MotionController;
use crate::firmware::grbl;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use xyctl_core::{CommandError, FirmwareKind, ParameterError};
use xyctl_settings::{ConfigSnapshot, SettingsError};

/// Outcome of a parameter restore
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreReport {
    /// Parameters the firmware accepted
    pub applied: usize,
    /// Parameters in the snapshot
    pub total: usize,
    /// `$n=value` commands that were not accepted
    pub failed: Vec<String>,
    /// Snapshot file replayed
    pub source: PathBuf,
}

impl RestoreReport {
    /// Whether every parameter was applied
    pub fn is_complete(&self) -> bool {
        self.applied == self.total
    }
}

fn persistence(e: SettingsError) -> ParameterError {
    ParameterError::Persistence {
        reason: e.to_string(),
    }
}

impl MotionController {
    fn require_grbl(&self) -> Result<(), ParameterError> {
        let inner = self.inner.lock();
        if !inner.is_connected() {
            return Err(ParameterError::NotConnected);
        }
        match inner.firmware() {
            FirmwareKind::Grbl => Ok(()),
            other => Err(ParameterError::UnsupportedFirmware {
                firmware: other.to_string(),
            }),
        }
    }

    /// Dump the GRBL parameters to a timestamped backup file
    ///
    /// Also refreshes the latest-backup copy. Returns the timestamped path.
    pub fn backup_parameters(&self) -> Result<PathBuf, ParameterError> {
        self.ensure_not_streaming()?;
        self.require_grbl()?;

        let (reply, port, firmware_info) = {
            let mut inner = self.inner.lock();
            let reply = inner.send_command(grbl::DUMP_PARAMETERS)?;
            let (port, firmware_info) = inner
                .info
                .as_ref()
                .map(|info| (info.port.clone(), info.firmware_info.clone()))
                .unwrap_or_default();
            (reply, port, firmware_info)
        };

        let raw: Vec<String> = reply
            .lines
            .into_iter()
            .filter(|line| line.starts_with('$'))
            .collect();
        let params: BTreeMap<String, String> = raw
            .iter()
            .filter_map(|line| grbl::parse_setting_line(line))
            .collect();
        if params.is_empty() {
            tracing::warn!("Parameter dump from {} was empty", port);
            return Err(ParameterError::NoParameters);
        }

        let snapshot = ConfigSnapshot::new(port, firmware_info, raw, params);
        self.store.save_backup(&snapshot).map_err(persistence)
    }

    /// Replay a parameter backup
    ///
    /// Without a path the latest backup is used. Rejected parameters are
    /// collected in the report; a transport failure stops the replay and
    /// the remaining parameters are reported as failed.
    pub fn restore_parameters(&self, path: Option<&Path>) -> Result<RestoreReport, ParameterError> {
        self.ensure_not_streaming()?;
        self.require_grbl()?;

        let (source, snapshot) = self.store.load_backup(path).map_err(persistence)?;
        let commands: Vec<String> = snapshot
            .ordered_params()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let mut report = RestoreReport {
            applied: 0,
            total: commands.len(),
            failed: Vec::new(),
            source,
        };
        tracing::info!(
            "Restoring {} parameters from {}",
            report.total,
            report.source.display()
        );

        let mut inner = self.inner.lock();
        let mut remaining = commands.into_iter();
        for command in remaining.by_ref() {
            match inner.send_command(&command) {
                Ok(_) => report.applied += 1,
                Err(e @ (CommandError::Io { .. } | CommandError::NotConnected)) => {
                    tracing::error!("Restore interrupted at {}: {}", command, e);
                    report.failed.push(command);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Parameter {} not applied: {}", command, e);
                    report.failed.push(command);
                }
            }
        }
        report.failed.extend(remaining);
        drop(inner);

        tracing::info!("Restored {}/{} parameters", report.applied, report.total);
        Ok(report)
    }

    /// Set and persist the GRBL direction invert mask (`$3`, 0..=7)
    pub fn set_direction_invert_mask(&self, mask: u8) -> Result<(), ParameterError> {
        if mask > 7 {
            return Err(ParameterError::InvalidValue {
                setting: "direction invert mask".to_string(),
                reason: format!("{} is not in 0..=7", mask),
            });
        }
        self.send_preference(&grbl::direction_mask_command(mask))?;

        let mut prefs = self.store.load_machine_preferences().unwrap_or_default();
        prefs.dir_invert_mask = Some(mask);
        self.store
            .save_machine_preferences(&prefs)
            .map_err(persistence)
    }

    /// Set and persist the GRBL junction deviation (`$11`, 0.005..=1.0 mm)
    pub fn set_junction_deviation(&self, value: f64) -> Result<(), ParameterError> {
        if !(0.005..=1.0).contains(&value) {
            return Err(ParameterError::InvalidValue {
                setting: "junction deviation".to_string(),
                reason: format!("{} is not in 0.005..=1.0", value),
            });
        }
        self.send_preference(&grbl::junction_deviation_command(value))?;

        let mut prefs = self.store.load_machine_preferences().unwrap_or_default();
        prefs.junction_deviation = Some(value);
        self.store
            .save_machine_preferences(&prefs)
            .map_err(persistence)
    }

    /// Send a setting when a GRBL is attached; otherwise it applies on connect
    fn send_preference(&self, command: &str) -> Result<(), ParameterError> {
        self.ensure_not_streaming()?;
        let mut inner = self.inner.lock();
        if inner.is_connected() && inner.firmware() == FirmwareKind::Grbl {
            inner.send_command(command)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::controller;
    use super::*;
    use crate::communication::SimulatedMachine;

    #[test]
    fn test_backup_writes_snapshot() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");

        let path = ctl.backup_parameters().expect("backup");
        assert!(path.exists());
        let (latest, snapshot) = ctl.store().load_backup(None).expect("latest");
        assert!(latest.ends_with("grbl_backup_latest.json"));
        assert_ne!(latest, path);
        assert_eq!(snapshot.port, "/dev/ttyUSB0");
        assert_eq!(snapshot.params.get("$110").map(String::as_str), Some("500.000"));
        assert_eq!(snapshot.params.get("$11").map(String::as_str), Some("0.01"));
        assert_eq!(snapshot.raw.len(), snapshot.params.len());
    }

    #[test]
    fn test_backup_requires_grbl() {
        let machine = SimulatedMachine::marlin();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        assert!(matches!(
            ctl.backup_parameters(),
            Err(ParameterError::UnsupportedFirmware { .. })
        ));
    }

    #[test]
    fn test_backup_requires_connection() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        assert_eq!(ctl.backup_parameters(), Err(ParameterError::NotConnected));
    }

    #[test]
    fn test_restore_replays_in_order() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        ctl.backup_parameters().expect("backup");

        machine.set_param(110, "100.000");
        machine.clear_records();
        let report = ctl.restore_parameters(None).expect("restore");
        assert!(report.is_complete());
        assert_eq!(report.total, 10);
        assert_eq!(machine.param(110).as_deref(), Some("500.000"));

        let written = machine.written_lines();
        assert_eq!(written.first().map(String::as_str), Some("$0=10"));
        assert_eq!(written.last().map(String::as_str), Some("$111=500.000"));
    }

    #[test]
    fn test_restore_reports_rejected_parameters() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        ctl.backup_parameters().expect("backup");

        machine.reject_next(3);
        let report = ctl.restore_parameters(None).expect("restore");
        assert_eq!(report.applied, report.total - 1);
        assert_eq!(report.failed, vec!["$0=10"]);
    }

    #[test]
    fn test_restore_interrupted_by_io_failure() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        let path = ctl.backup_parameters().expect("backup");

        machine.set_fail_io(true);
        let report = ctl.restore_parameters(Some(&path)).expect("partial report");
        assert_eq!(report.applied, 0);
        assert_eq!(report.failed.len(), report.total);
        assert_eq!(report.source, path);
    }

    #[test]
    fn test_restore_without_backup() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        assert!(matches!(
            ctl.restore_parameters(None),
            Err(ParameterError::Persistence { .. })
        ));
    }

    #[test]
    fn test_preferences_sent_and_persisted() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        machine.clear_records();

        ctl.set_direction_invert_mask(5).expect("mask");
        ctl.set_junction_deviation(0.02).expect("junction");
        assert_eq!(machine.written_lines(), vec!["$3=5", "$11=0.02"]);

        let prefs = ctl.store().load_machine_preferences().expect("prefs");
        assert_eq!(prefs.dir_invert_mask, Some(5));
        assert_eq!(prefs.junction_deviation, Some(0.02));

        // re-applied on the next connect
        machine.clear_records();
        ctl.connect(None).expect("reconnect");
        let written = machine.written_lines();
        assert!(written.contains(&"$11=0.02".to_string()));
        assert!(written.contains(&"$3=5".to_string()));
    }

    #[test]
    fn test_preferences_validated() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        assert!(matches!(
            ctl.set_direction_invert_mask(8),
            Err(ParameterError::InvalidValue { .. })
        ));
        assert!(matches!(
            ctl.set_junction_deviation(2.0),
            Err(ParameterError::InvalidValue { .. })
        ));
        // persisted while disconnected
        ctl.set_junction_deviation(0.5).expect("junction");
        assert_eq!(
            ctl.store()
                .load_machine_preferences()
                .expect("prefs")
                .junction_deviation,
            Some(0.5)
        );
    }
}
