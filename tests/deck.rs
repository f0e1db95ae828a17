use roboctab::core::{LabwareRole, Placement, SlotId};
use roboctab::deck::{Deck, LabwareState, Requirement};
use roboctab::error::ProtocolError;
use roboctab::topology::{DeckTopology, Stage};

fn all_slots() -> Vec<SlotId> {
    Deck::usable_slots()
}

fn two_plate_deck() -> Deck {
    let mut deck = Deck::new();
    for (role, slot) in [
        (LabwareRole::SamplePlate(1), 1),
        (LabwareRole::SamplePlate(2), 2),
    ] {
        deck.declare(role).unwrap();
        deck.load(role, Placement::OnDeck(SlotId(slot))).unwrap();
    }
    deck
}

#[test]
fn test_initial_decks_are_injective() {
    for plates in 1..=4 {
        let topology = DeckTopology::for_plates(plates).expect("topology exists");
        let deck = topology.initial_deck().expect("initial layout loads");
        assert!(deck.is_injective(), "{plates}-plate layout is not injective");
        assert_eq!(deck.occupant(SlotId::TRASH), None);
    }
    assert!(DeckTopology::for_plates(0).is_err());
    assert!(DeckTopology::for_plates(5).is_err());
}

#[test]
fn test_load_rejects_occupied_and_trash_slots() {
    let mut deck = two_plate_deck();
    deck.declare(LabwareRole::FinalPlate(1)).unwrap();
    assert!(matches!(
        deck.load(LabwareRole::FinalPlate(1), Placement::OnDeck(SlotId(1))),
        Err(ProtocolError::SlotConflict { .. })
    ));
    assert!(matches!(
        deck.load(LabwareRole::FinalPlate(1), Placement::OnDeck(SlotId::TRASH)),
        Err(ProtocolError::SlotConflict { .. })
    ));
    assert!(matches!(
        deck.load(LabwareRole::MixingTips(1), Placement::OffDeck),
        Err(ProtocolError::UnknownLabware(_))
    ));
    assert!(deck.declare(LabwareRole::SamplePlate(1)).is_err());
}

#[test]
fn test_removals_precede_placements_on_the_same_slot() {
    let topology = DeckTopology::for_plates(4).unwrap();
    let mut deck = topology.initial_deck().unwrap();

    let relocations = deck
        .reconcile(topology.requirements(Stage::AfterChloroform), &all_slots())
        .expect("chloroform checkpoint reconciles");

    for (i, placed) in relocations.iter().enumerate() {
        let Placement::OnDeck(slot) = placed.to else {
            continue;
        };
        if let Some(j) = relocations
            .iter()
            .position(|r| r.from == Placement::OnDeck(slot) && r.labware != placed.labware)
        {
            assert!(j < i, "slot {slot} filled before it was cleared");
        }
    }

    assert!(deck.is_injective());
    assert_eq!(
        deck.state(LabwareRole::MixingTips(1)),
        Some(LabwareState::Retired)
    );
    assert_eq!(
        deck.occupant(SlotId(8)),
        Some(LabwareRole::TransferTips(1))
    );
    assert_eq!(deck.occupant(SlotId(10)), Some(LabwareRole::FinalPlate(4)));
}

#[test]
fn test_four_plate_checkpoints_end_state() {
    let topology = DeckTopology::for_plates(4).unwrap();
    assert_eq!(topology.checkpoints().len(), 3);

    let mut deck = topology.initial_deck().unwrap();
    for checkpoint in topology.checkpoints() {
        let moves = deck
            .reconcile(&checkpoint.requirements, &all_slots())
            .expect("checkpoint reconciles");
        println!("{}: {} moves", checkpoint.stage, moves.len());
        assert!(deck.is_injective());
    }

    assert_eq!(deck.occupant(SlotId(3)), Some(LabwareRole::ReagentTips));
    assert_eq!(deck.occupant(SlotId(2)), Some(LabwareRole::TransferTips(3)));
    assert_eq!(deck.occupant(SlotId(1)), Some(LabwareRole::TransferTips(4)));
    for plate in 1..=4 {
        assert_eq!(
            deck.state(LabwareRole::SamplePlate(plate)),
            Some(LabwareState::Retired)
        );
        assert!(deck.is_on_deck(LabwareRole::FinalPlate(plate)));
    }
}

#[test]
fn test_satisfied_requirements_emit_nothing() {
    let mut deck = two_plate_deck();
    let moves = deck
        .reconcile(
            &[Requirement::on_deck(LabwareRole::SamplePlate(1), 1)],
            &all_slots(),
        )
        .unwrap();
    assert!(moves.is_empty());
}

#[test]
fn test_chained_moves_are_ordered() {
    let mut deck = two_plate_deck();
    let moves = deck
        .reconcile(
            &[
                Requirement::on_deck(LabwareRole::SamplePlate(1), 2),
                Requirement::on_deck(LabwareRole::SamplePlate(2), 3),
            ],
            &all_slots(),
        )
        .expect("chain resolves");

    assert_eq!(moves.len(), 2);
    assert_eq!(moves[0].labware, LabwareRole::SamplePlate(2));
    assert_eq!(moves[0].to, Placement::OnDeck(SlotId(3)));
    assert_eq!(moves[1].labware, LabwareRole::SamplePlate(1));
    assert_eq!(moves[1].to, Placement::OnDeck(SlotId(2)));
    assert_eq!(
        moves[1].to_string(),
        "move samples plate 1 from slot 1 to slot 2"
    );
    assert!(deck.is_injective());
}

#[test]
fn test_conflict_leaves_deck_untouched() {
    let mut deck = two_plate_deck();
    deck.declare(LabwareRole::FinalPlate(1)).unwrap();
    deck.load(LabwareRole::FinalPlate(1), Placement::OffDeck).unwrap();

    let err = deck
        .reconcile(
            &[
                Requirement::retired(LabwareRole::SamplePlate(2)),
                Requirement::on_deck(LabwareRole::FinalPlate(1), 1),
            ],
            &all_slots(),
        )
        .unwrap_err();
    assert!(matches!(err, ProtocolError::SlotConflict { slot: SlotId(1), .. }));

    // The retirement that preceded the failure was rolled back too.
    assert!(deck.is_on_deck(LabwareRole::SamplePlate(2)));
    assert_eq!(
        deck.state(LabwareRole::FinalPlate(1)),
        Some(LabwareState::OffDeck)
    );
}

#[test]
fn test_swap_without_free_slot_is_a_conflict() {
    let mut deck = two_plate_deck();
    let err = deck
        .reconcile(
            &[
                Requirement::on_deck(LabwareRole::SamplePlate(1), 2),
                Requirement::on_deck(LabwareRole::SamplePlate(2), 1),
            ],
            &all_slots(),
        )
        .unwrap_err();
    assert!(matches!(err, ProtocolError::SlotConflict { .. }));
    assert_eq!(deck.occupant(SlotId(1)), Some(LabwareRole::SamplePlate(1)));
}

#[test]
fn test_trash_and_unavailable_slots_are_rejected() {
    let mut deck = two_plate_deck();
    assert!(matches!(
        deck.reconcile(
            &[Requirement::on_deck(LabwareRole::SamplePlate(1), 12)],
            &all_slots()
        ),
        Err(ProtocolError::SlotConflict { .. })
    ));
    assert!(matches!(
        deck.reconcile(
            &[Requirement::on_deck(LabwareRole::SamplePlate(1), 5)],
            &[SlotId(4)]
        ),
        Err(ProtocolError::SlotConflict { .. })
    ));
}

#[test]
fn test_retired_labware_never_returns() {
    let mut deck = two_plate_deck();
    let moves = deck
        .reconcile(
            &[Requirement::retired(LabwareRole::SamplePlate(1))],
            &all_slots(),
        )
        .unwrap();
    assert_eq!(moves.len(), 1);
    assert!(moves[0].retire);
    assert_eq!(
        moves[0].to_string(),
        "remove samples plate 1 from slot 1 (done)"
    );
    assert_eq!(deck.occupant(SlotId(1)), None);

    assert!(matches!(
        deck.reconcile(
            &[Requirement::on_deck(LabwareRole::SamplePlate(1), 1)],
            &all_slots()
        ),
        Err(ProtocolError::IllegalTransition { .. })
    ));
    assert!(matches!(
        deck.reconcile(
            &[Requirement::off_deck(LabwareRole::SamplePlate(1))],
            &all_slots()
        ),
        Err(ProtocolError::IllegalTransition { .. })
    ));
}

#[test]
fn test_unknown_and_duplicate_requirements() {
    let mut deck = two_plate_deck();
    assert!(matches!(
        deck.reconcile(
            &[Requirement::on_deck(LabwareRole::ReagentTips, 5)],
            &all_slots()
        ),
        Err(ProtocolError::UnknownLabware(LabwareRole::ReagentTips))
    ));
    assert!(matches!(
        deck.reconcile(
            &[
                Requirement::off_deck(LabwareRole::SamplePlate(1)),
                Requirement::on_deck(LabwareRole::SamplePlate(1), 4),
            ],
            &all_slots()
        ),
        Err(ProtocolError::IllegalTransition { .. })
    ));
}
