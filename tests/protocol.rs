use roboctab::addressing::ColumnRange;
use roboctab::commands::DeviceOp;
use roboctab::config::{ChloroformMixing, ProtocolConfig};
use roboctab::core::{LabwareRole, Location, Microliters, Placement, SlotId};
use roboctab::distribution::ReagentPhase;
use roboctab::error::ProtocolError;
use roboctab::protocol::{audit_plan, plan, single_distribution};
use roboctab::topology::Stage;

const MODES: [ChloroformMixing; 3] = [
    ChloroformMixing::PipetteMixing,
    ChloroformMixing::BubbleMixing,
    ChloroformMixing::NoMixing,
];

fn config_for(plates: usize) -> ProtocolConfig {
    let mut ranges = vec![ColumnRange::UNUSED; 4];
    for range in ranges.iter_mut().take(plates) {
        *range = ColumnRange::FULL;
    }
    ProtocolConfig {
        plates: ranges,
        ..ProtocolConfig::default()
    }
}

fn max_held(ops: &[DeviceOp]) -> f64 {
    let mut held: f64 = 0.0;
    let mut max: f64 = 0.0;
    for op in ops {
        match op {
            DeviceOp::PickUpTip { .. }
            | DeviceOp::DropTip { .. }
            | DeviceOp::ReturnTip
            | DeviceOp::BlowOut { .. } => held = 0.0,
            DeviceOp::Aspirate { volume, .. } | DeviceOp::AirGap { volume } => held += volume.0,
            DeviceOp::Dispense { volume, .. } => held = (held - volume.0).max(0.0),
            _ => {}
        }
        max = max.max(held);
    }
    max
}

fn tip_pickups_at(ops: &[DeviceOp], rack: LabwareRole) -> Vec<usize> {
    ops.iter()
        .enumerate()
        .filter(|(_, op)| {
            matches!(op, DeviceOp::PickUpTip { location: Some(loc) } if loc.labware() == Some(rack))
        })
        .map(|(i, _)| i)
        .collect()
}

fn move_index(ops: &[DeviceOp], labware: LabwareRole) -> Option<usize> {
    ops.iter()
        .position(|op| matches!(op, DeviceOp::MoveLabware { labware: l, .. } if *l == labware))
}

#[test]
fn test_every_layout_plans_and_audits() {
    for plates in 1..=4 {
        for mixing in MODES {
            for (iso, eth) in [(false, false), (true, false), (false, true), (true, true)] {
                let config = ProtocolConfig {
                    chloroform_mixing: mixing,
                    pipette_off_isopropanol: iso,
                    pipette_off_ethanol: eth,
                    ..config_for(plates)
                };
                let run = plan(&config).unwrap_or_else(|e| {
                    panic!("{plates} plates, {mixing:?}, iso {iso}, eth {eth}: {e}")
                });

                assert_eq!(run.plate_count, plates);
                assert_eq!(run.columns, 12 * plates);
                audit_plan(&run.ops).expect("plan passes its own audit");
                assert!(max_held(&run.ops) <= config.capacity + 1e-9);
                assert!(matches!(run.ops.last(), Some(DeviceOp::Comment { .. })));
            }
        }
    }
}

#[test]
fn test_checkpoint_counts_per_layout() {
    let expected = [(1, 0), (2, 0), (3, 2), (4, 3)];
    for (plates, checkpoints) in expected {
        let run = plan(&config_for(plates)).unwrap();
        assert_eq!(run.checkpoints.len(), checkpoints, "{plates} plates");
        println!(
            "{plates} plates: {} commands, {} pauses",
            run.ops.len(),
            run.pause_count()
        );
    }

    let run = plan(&config_for(4)).unwrap();
    let stages: Vec<Stage> = run.checkpoints.iter().map(|c| c.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::AfterChloroform,
            Stage::AfterTransferGroup(0),
            Stage::AfterSupernatant
        ]
    );
}

#[test]
fn test_four_plate_supernatant_is_split_around_the_rack_swap() {
    let run = plan(&config_for(4)).unwrap();
    let ops = &run.ops;

    let rack3_arrives = move_index(ops, LabwareRole::TransferTips(3)).expect("rack 3 is placed");
    let plate1_leaves = move_index(ops, LabwareRole::SamplePlate(1)).expect("plate 1 is removed");
    assert!(plate1_leaves < rack3_arrives);

    let first_group = tip_pickups_at(ops, LabwareRole::TransferTips(1));
    assert_eq!(first_group.len(), 12);
    assert!(first_group.iter().all(|i| *i < plate1_leaves));

    let second_group = tip_pickups_at(ops, LabwareRole::TransferTips(3));
    assert_eq!(second_group.len(), 12);
    assert!(second_group.iter().all(|i| *i > rack3_arrives));

    // The deck change is announced before the moves happen.
    assert!(matches!(&ops[plate1_leaves - 1], DeviceOp::Pause { message } if message.starts_with("Deck change")));
}

#[test]
fn test_small_layouts_have_no_relocations() {
    for plates in 1..=2 {
        let run = plan(&config_for(plates)).unwrap();
        assert!(!run
            .ops
            .iter()
            .any(|op| matches!(op, DeviceOp::MoveLabware { .. })));
    }
}

#[test]
fn test_partial_columns() {
    let config = ProtocolConfig {
        plates: vec![
            ColumnRange::new(1, 3),
            ColumnRange::new(5, 12),
            ColumnRange::UNUSED,
            ColumnRange::UNUSED,
        ],
        ..ProtocolConfig::default()
    };
    let run = plan(&config).unwrap();
    assert_eq!(run.plate_count, 2);
    assert_eq!(run.columns, 11);

    // One transfer tip per sample column.
    let transfers = tip_pickups_at(&run.ops, LabwareRole::TransferTips(1)).len()
        + tip_pickups_at(&run.ops, LabwareRole::TransferTips(2)).len();
    assert_eq!(transfers, 11);

    // Column 4 of plate 2 is never touched.
    let untouched = Location::well(LabwareRole::SamplePlate(2), 4);
    assert!(!run
        .ops
        .iter()
        .filter_map(|op| op.location())
        .any(|loc| loc.site == untouched.site));
}

#[test]
fn test_mixing_modes_change_the_chloroform_step() {
    let count_mixing_pickups = |mode| {
        let config = ProtocolConfig {
            chloroform_mixing: mode,
            ..config_for(1)
        };
        let run = plan(&config).unwrap();
        tip_pickups_at(&run.ops, LabwareRole::MixingTips(1)).len()
    };
    assert_eq!(count_mixing_pickups(ChloroformMixing::PipetteMixing), 12);
    assert_eq!(count_mixing_pickups(ChloroformMixing::BubbleMixing), 12);
    assert_eq!(count_mixing_pickups(ChloroformMixing::NoMixing), 0);
}

#[test]
fn test_pipette_off_reuses_transfer_tips() {
    let base = plan(&config_for(1)).unwrap();
    let with_iso = plan(&ProtocolConfig {
        pipette_off_isopropanol: true,
        ..config_for(1)
    })
    .unwrap();
    let base_uses = tip_pickups_at(&base.ops, LabwareRole::TransferTips(1)).len();
    let iso_uses = tip_pickups_at(&with_iso.ops, LabwareRole::TransferTips(1)).len();
    assert_eq!(base_uses, 12);
    assert_eq!(iso_uses, 24);

    let trash_dispenses = with_iso
        .ops
        .iter()
        .filter(|op| matches!(op, DeviceOp::Dispense { location, .. } if *location == Location::trash()))
        .count();
    assert_eq!(trash_dispenses, 24);
}

#[test]
fn test_water_returns_its_tip_and_elution_drops() {
    let run = plan(&config_for(1)).unwrap();
    let first_tip = run
        .ops
        .iter()
        .position(|op| matches!(op, DeviceOp::PickUpTip { .. }))
        .unwrap();
    let first_release = run.ops[first_tip..]
        .iter()
        .find(|op| matches!(op, DeviceOp::DropTip { .. } | DeviceOp::ReturnTip))
        .unwrap();
    assert_eq!(*first_release, DeviceOp::ReturnTip);

    let elution = tip_pickups_at(&run.ops, LabwareRole::ReagentTips);
    let last = *elution.last().unwrap();
    assert_eq!(
        run.ops[last],
        DeviceOp::PickUpTip {
            location: Some(Location::well(LabwareRole::ReagentTips, 3))
        }
    );
}

#[test]
fn test_invalid_configs_fail_before_planning() {
    let gap = ProtocolConfig {
        plates: vec![
            ColumnRange::FULL,
            ColumnRange::UNUSED,
            ColumnRange::FULL,
            ColumnRange::UNUSED,
        ],
        ..ProtocolConfig::default()
    };
    assert!(matches!(plan(&gap), Err(ProtocolError::Config(_))));

    let too_much = ProtocolConfig {
        elution_buffer_volume: 400.0,
        ..ProtocolConfig::default()
    };
    assert!(matches!(plan(&too_much), Err(ProtocolError::Config(_))));
}

#[test]
fn test_audit_rejects_labware_off_the_deck() {
    let ops = vec![
        DeviceOp::LoadLabware {
            labware: LabwareRole::SamplePlate(1),
            load_name: "plate".into(),
            placement: Placement::OnDeck(SlotId(1)),
        },
        DeviceOp::LoadLabware {
            labware: LabwareRole::FinalPlate(1),
            load_name: "plate".into(),
            placement: Placement::OffDeck,
        },
        DeviceOp::PickUpTip { location: None },
        DeviceOp::Aspirate {
            volume: Microliters(50.0),
            location: Location::well(LabwareRole::SamplePlate(1), 1),
            rate: 1.0,
        },
        DeviceOp::Dispense {
            volume: Microliters(50.0),
            location: Location::well(LabwareRole::FinalPlate(1), 1),
            rate: 1.0,
        },
    ];
    assert!(matches!(
        audit_plan(&ops),
        Err(ProtocolError::NotOnDeck {
            labware: LabwareRole::FinalPlate(1),
            step: 4
        })
    ));

    let mut fixed = ops.clone();
    fixed.insert(
        4,
        DeviceOp::MoveLabware {
            labware: LabwareRole::FinalPlate(1),
            from: Placement::OffDeck,
            to: Placement::OnDeck(SlotId(4)),
        },
    );
    audit_plan(&fixed).expect("placed plate can be used");

    // A move whose origin disagrees with the ledger.
    let mut wrong = ops[..2].to_vec();
    wrong.push(DeviceOp::MoveLabware {
        labware: LabwareRole::SamplePlate(1),
        from: Placement::OnDeck(SlotId(2)),
        to: Placement::OffDeck,
    });
    assert!(matches!(
        audit_plan(&wrong),
        Err(ProtocolError::IllegalTransition { .. })
    ));
}

#[test]
fn test_single_distribution_presets() {
    for phase in [
        ReagentPhase::Water,
        ReagentPhase::Extraction,
        ReagentPhase::Chloroform,
        ReagentPhase::Isopropanol,
        ReagentPhase::Elution,
    ] {
        let ops = single_distribution(phase, 2, ColumnRange::new(1, 8), 40.0, 300.0)
            .unwrap_or_else(|e| panic!("{phase:?}: {e}"));
        let target = match phase {
            ReagentPhase::Isopropanol | ReagentPhase::Elution => LabwareRole::FinalPlate(2),
            _ => LabwareRole::SamplePlate(2),
        };
        let dispenses = ops
            .iter()
            .filter(|op| {
                matches!(op, DeviceOp::Dispense { location, .. } if location.labware() == Some(target))
            })
            .count();
        assert_eq!(dispenses, 8, "{phase:?}");
    }

    assert!(single_distribution(ReagentPhase::Water, 1, ColumnRange::new(4, 2), 40.0, 300.0)
        .is_err());
    assert!(single_distribution(ReagentPhase::Water, 1, ColumnRange::FULL, 350.0, 300.0).is_err());
}

#[test]
fn test_capacity_drives_the_water_batches() {
    let config = ProtocolConfig {
        capacity: 400.0,
        ..config_for(1)
    };
    let run = plan(&config).expect("400 uL tips plan");
    audit_plan(&run.ops).unwrap();
    assert!(max_held(&run.ops) <= 400.0 + 1e-9);

    // 12 columns at 50 uL: two full-tip charges of 8 and 4 columns.
    let water_charges = run
        .ops
        .iter()
        .filter(|op| {
            matches!(op, DeviceOp::Aspirate { volume, location, .. }
                if volume.0 == 400.0 && location.labware() == Some(LabwareRole::WaterReservoir))
        })
        .count();
    assert_eq!(water_charges, 2);

    let small = ProtocolConfig {
        capacity: 200.0,
        ..config_for(1)
    };
    assert!(matches!(plan(&small), Err(ProtocolError::Config(_))));
}

#[test]
fn test_small_elution_volume_is_rejected_before_planning() {
    let config = ProtocolConfig {
        elution_buffer_volume: 8.0,
        ..config_for(1)
    };
    assert!(matches!(plan(&config), Err(ProtocolError::Config(_))));
}
