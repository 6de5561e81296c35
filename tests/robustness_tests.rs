use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const HEADER: [&str; 10] = [
    "command", "booking", "item", "start", "end", "guests", "options", "requester", "method",
    "reason",
];

#[test]
fn test_malformed_csv_handling() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("robustness_test.csv");
    let mut wtr = csv::Writer::from_path(&script).unwrap();
    wtr.write_record(HEADER).unwrap();

    // Valid booking
    wtr.write_record(["create", "b1", "property/42", "2024-07-01", "2024-07-03", "1", "", "user:u1", "", ""])
        .unwrap();
    // Unknown command
    wtr.write_record(["teleport", "b2", "property/42", "2024-07-05", "2024-07-06", "1", "", "user:u1", "", ""])
        .unwrap();
    // Not a date
    wtr.write_record(["create", "b3", "property/42", "someday", "2024-07-06", "1", "", "user:u1", "", ""])
        .unwrap();
    // Valid booking again
    wtr.write_record(["create", "b4", "vehicle/7", "2024-08-01", "2024-08-04", "1", "", "user:u1", "", ""])
        .unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("stayline"));
    cmd.arg("tests/fixtures/catalog.json").arg(&script);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading command"))
        .stdout(predicate::str::contains("b1,create,ok"))
        .stdout(predicate::str::contains("b4,create,ok"))
        .stdout(predicate::str::contains("b2,").not())
        .stdout(predicate::str::contains("b3,").not());
}

#[test]
fn test_commands_on_unknown_bookings_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("unknown_booking.csv");
    let mut wtr = csv::Writer::from_path(&script).unwrap();
    wtr.write_record(HEADER).unwrap();

    wtr.write_record(["pay", "ghost", "", "", "", "", "", "", "card", ""])
        .unwrap();
    wtr.write_record(["create", "b1", "property/42", "2024-07-01", "2024-07-03", "1", "", "user:u1", "", ""])
        .unwrap();
    // Completing before any session was opened
    wtr.write_record(["complete", "b1", "", "", "", "", "", "", "", ""])
        .unwrap();
    // Paying with a method the processor does not offer
    wtr.write_record(["pay", "b1", "", "", "", "", "", "", "cheque", ""])
        .unwrap();
    // Reusing a label
    wtr.write_record(["create", "b1", "vehicle/7", "2024-08-01", "2024-08-04", "1", "", "user:u1", "", ""])
        .unwrap();
    wtr.flush().unwrap();
    drop(wtr);

    let mut cmd = Command::new(cargo_bin!("stayline"));
    cmd.arg("tests/fixtures/catalog.json").arg(&script);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ghost,pay,error,,,,,Not found: booking 'ghost'"))
        .stdout(predicate::str::contains("b1,complete,error"))
        .stdout(predicate::str::contains("has no payment session"))
        .stdout(predicate::str::contains("unknown payment method 'cheque'"))
        .stdout(predicate::str::contains("booking label 'b1' is already used"));
}
