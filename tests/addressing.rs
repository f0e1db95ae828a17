use roboctab::addressing::{active_plate_count, ColumnRange, DestinationSet};
use roboctab::core::{LabwareRole, Location};
use roboctab::error::ProtocolError;
use roboctab::topology::DeckTopology;

#[test]
fn test_unused_plate_contributes_nothing() {
    let set = DestinationSet::for_plate(2, LabwareRole::SamplePlate(2), ColumnRange::UNUSED);
    assert!(set.is_empty());

    let ranges = [ColumnRange::FULL, ColumnRange::UNUSED];
    let set = DestinationSet::across_plates(&ranges, LabwareRole::SamplePlate);
    assert_eq!(set.len(), 12);
    assert!(set.iter().all(|d| d.plate == 1));
}

#[test]
fn test_partial_range_columns_in_order() {
    let set = DestinationSet::for_plate(1, LabwareRole::SamplePlate(1), ColumnRange::new(3, 5));
    let columns: Vec<u8> = set.iter().map(|d| d.column).collect();
    assert_eq!(columns, vec![3, 4, 5]);
    assert_eq!(
        set.locations()[0],
        Location::well(LabwareRole::SamplePlate(1), 3)
    );
}

#[test]
fn test_active_plate_count() {
    let full = ColumnRange::FULL;
    let off = ColumnRange::UNUSED;
    assert_eq!(active_plate_count(&[full, off, off, off]).unwrap(), 1);
    assert_eq!(active_plate_count(&[full, full, full, off]).unwrap(), 3);
    assert_eq!(active_plate_count(&[full; 4]).unwrap(), 4);
    assert_eq!(active_plate_count(&[ColumnRange::new(1, 1)]).unwrap(), 1);
}

#[test]
fn test_plate_gap_is_rejected() {
    let full = ColumnRange::FULL;
    let off = ColumnRange::UNUSED;
    let err = active_plate_count(&[full, off, full, off]).unwrap_err();
    assert!(matches!(err, ProtocolError::Config(_)));
    println!("gap rejected: {err}");

    assert!(active_plate_count(&[off, off, off, off]).is_err());
    assert!(active_plate_count(&[full; 5]).is_err());
}

#[test]
fn test_range_validation() {
    assert!(ColumnRange::new(5, 3).validate(1).is_err());
    assert!(ColumnRange::new(1, 13).validate(1).is_err());
    assert!(ColumnRange::new(12, 12).validate(1).is_ok());
    assert!(ColumnRange::UNUSED.validate(1).is_ok());
    assert_eq!(ColumnRange::new(5, 3).len(), 0);
}

#[test]
fn test_transfer_groups_partition_the_destinations() {
    let ranges = [
        ColumnRange::FULL,
        ColumnRange::new(2, 6),
        ColumnRange::FULL,
        ColumnRange::new(1, 4),
    ];
    let all = DestinationSet::across_plates(&ranges, LabwareRole::SamplePlate);
    assert_eq!(all.len(), 12 + 5 + 12 + 4);

    let topology = DeckTopology::for_plates(4).expect("4-plate layout");
    let groups: Vec<DestinationSet> = topology
        .transfer_groups()
        .iter()
        .map(|plates| all.filter_plates(plates))
        .collect();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len(), 17);
    assert_eq!(groups[1].len(), 16);
    assert!(groups[0].iter().all(|d| d.plate <= 2));
    assert!(groups[1].iter().all(|d| d.plate >= 3));

    // Disjoint, and concatenated in group order they give back the full set.
    let mut joined = DestinationSet::new();
    for group in groups {
        joined.extend(group);
    }
    assert_eq!(joined, all);

    // Smaller layouts transfer everything in one group.
    for plates in 1..=3 {
        let topology = DeckTopology::for_plates(plates).unwrap();
        let active = &ranges[..plates];
        let set = DestinationSet::across_plates(active, LabwareRole::SamplePlate);
        assert_eq!(topology.transfer_groups().len(), 1);
        assert_eq!(set.filter_plates(&topology.transfer_groups()[0]), set);
    }
}

#[test]
fn test_sibling_keeps_the_column() {
    let set = DestinationSet::for_plate(3, LabwareRole::SamplePlate(3), ColumnRange::new(7, 8));
    let tips: Vec<Location> = set
        .iter()
        .map(|d| d.sibling(LabwareRole::TransferTips(3)))
        .collect();
    assert_eq!(
        tips,
        vec![
            Location::well(LabwareRole::TransferTips(3), 7),
            Location::well(LabwareRole::TransferTips(3), 8),
        ]
    );
}
