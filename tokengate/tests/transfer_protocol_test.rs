// Transfer protocol integration tests
//
// Exercises the ruleset-governed mint lifecycle end to end: wrapping,
// allow/deny enforcement, the capture/transfer/reconcile protocol with
// seller-fee collection, lock semantics, burn finality and account
// closing. Every step goes through the atomic batch surface so these
// tests also pin down the all-or-nothing behavior.

use tokengate::{
    Address, Batch, MetadataInfo, Operation, PolicyEngine, Ruleset, TokenGateError, TokenLedger,
};

struct Setup {
    engine: PolicyEngine,
    mint: Address,
    authority: Address,
    collector: Address,
    ruleset_id: Address,
    alice: Address,
    bob: Address,
}

// A wrapped mint held by alice, bob with an empty target account,
// governed by a ruleset named "main".
fn setup(check_seller_fee: bool) -> Setup {
    let engine = PolicyEngine::new_in_memory();
    let mint = Address::new_unique();
    let authority = Address::new_unique();
    let collector = Address::new_unique();
    let alice = Address::new_unique();
    let bob = Address::new_unique();
    let ruleset_id = Ruleset::derive_id("main");

    engine
        .execute_batch(&Batch::new(vec![
            Operation::InitRuleset {
                name: "main".to_string(),
                authority,
                collector,
                check_seller_fee_basis_points: check_seller_fee,
                disallowed_addresses: vec![],
                allowed_programs: vec![],
            },
            Operation::InitMint {
                mint,
                ruleset: ruleset_id,
                authority,
                collector,
                target: alice,
            },
            Operation::InitAccount { owner: bob, mint },
        ]))
        .expect("Failed to set up wrapped mint");

    Setup {
        engine,
        mint,
        authority,
        collector,
        ruleset_id,
        alice,
        bob,
    }
}

fn holder_of(setup: &Setup, owner: &Address) -> u64 {
    let address = setup
        .engine
        .ledger()
        .token_account_address(owner, &setup.mint);
    setup
        .engine
        .ledger()
        .token_account(&address)
        .map(|a| a.amount)
        .unwrap_or(0)
}

fn transfer_batch(setup: &Setup, from: Address, to: Address) -> Batch {
    Batch::new(vec![Operation::Transfer {
        mint: setup.mint,
        from,
        to,
    }])
}

#[test]
fn test_ruleset_round_trip() {
    let setup = setup(false);
    let ruleset = setup
        .engine
        .policy_store()
        .get_ruleset(&setup.ruleset_id)
        .expect("Failed to read ruleset back");

    assert_eq!(ruleset.authority, setup.authority);
    assert_eq!(ruleset.collector, setup.collector);
    assert!(!ruleset.check_seller_fee_basis_points);
    assert_eq!(ruleset.name, "main");
    assert_eq!(
        ruleset.disallowed_addresses.len(),
        0,
        "Empty lists read back zero-length, not absent"
    );
    assert_eq!(ruleset.allowed_programs.len(), 0);
}

#[test]
fn test_update_rejection_is_idempotent() {
    let setup = setup(false);
    let outsider = Address::new_unique();

    let bad_update = |signer: Address| {
        Batch::new(vec![Operation::UpdateRuleset {
            ruleset: setup.ruleset_id,
            signer,
            authority: outsider,
            collector: setup.collector,
            check_seller_fee_basis_points: false,
            disallowed_addresses: vec![],
            allowed_programs: vec![],
        }])
    };

    // The same failed update submitted twice produces the same error
    // code both times.
    let first = setup.engine.execute_batch(&bad_update(outsider));
    let second = setup.engine.execute_batch(&bad_update(outsider));
    assert_eq!(
        first.unwrap_err().code(),
        second.unwrap_err().code(),
        "Rejection must be idempotent"
    );

    // The real authority still works, and afterwards the old signer is
    // rejected with InvalidAuthority.
    let new_authority = Address::new_unique();
    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::UpdateRuleset {
            ruleset: setup.ruleset_id,
            signer: setup.authority,
            authority: new_authority,
            collector: setup.collector,
            check_seller_fee_basis_points: false,
            disallowed_addresses: vec![],
            allowed_programs: vec![],
        }]))
        .expect("Update by the current authority should pass");

    let stale = setup.engine.execute_batch(&bad_update(setup.authority));
    assert!(matches!(
        stale.unwrap_err(),
        TokenGateError::InvalidAuthority
    ));
}

#[test]
fn test_program_disallow_enforcement() {
    let setup = setup(false);
    let denied = Address::new_unique();

    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::UpdateRuleset {
            ruleset: setup.ruleset_id,
            signer: setup.authority,
            authority: setup.authority,
            collector: setup.collector,
            check_seller_fee_basis_points: false,
            disallowed_addresses: vec![denied],
            allowed_programs: vec![],
        }]))
        .expect("Failed to update ruleset");

    // Denylist applies even though the allow-list is empty.
    let result = setup.engine.execute_batch(
        &transfer_batch(&setup, setup.alice, setup.bob).with_program_ids(vec![denied]),
    );
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::ProgramDisallowed
    ));
    assert_eq!(holder_of(&setup, &setup.alice), 1, "No partial effects");

    // A denied participant is just as fatal as a denied program.
    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::UpdateRuleset {
            ruleset: setup.ruleset_id,
            signer: setup.authority,
            authority: setup.authority,
            collector: setup.collector,
            check_seller_fee_basis_points: false,
            disallowed_addresses: vec![setup.bob],
            allowed_programs: vec![],
        }]))
        .expect("Failed to update ruleset");
    let result = setup
        .engine
        .execute_batch(&transfer_batch(&setup, setup.alice, setup.bob));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::ProgramDisallowed
    ));
}

#[test]
fn test_program_allowlist_enforcement() {
    let setup = setup(false);
    let allowed = Address::new_unique();
    let unlisted = Address::new_unique();

    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::UpdateRuleset {
            ruleset: setup.ruleset_id,
            signer: setup.authority,
            authority: setup.authority,
            collector: setup.collector,
            check_seller_fee_basis_points: false,
            disallowed_addresses: vec![],
            allowed_programs: vec![allowed],
        }]))
        .expect("Failed to update ruleset");

    let result = setup.engine.execute_batch(
        &transfer_batch(&setup, setup.alice, setup.bob).with_program_ids(vec![unlisted]),
    );
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::ProgramNotAllowed
    ));

    setup
        .engine
        .execute_batch(
            &transfer_batch(&setup, setup.alice, setup.bob).with_program_ids(vec![allowed]),
        )
        .expect("Allowed program should transfer");
    assert_eq!(holder_of(&setup, &setup.bob), 1);
}

#[test]
fn test_seller_fee_capture_protocol() {
    let setup = setup(true);
    let ledger = setup.engine.ledger();
    ledger
        .set_metadata(
            setup.mint,
            MetadataInfo {
                name: "Protocol".to_string(),
                symbol: "PRTCL".to_string(),
                uri: String::new(),
                seller_fee_basis_points: 500,
                update_authority: setup.authority,
            },
        )
        .expect("Failed to set metadata");

    // A bare transfer is rejected: the fee check demands the
    // capture/reconcile pair.
    let result = setup
        .engine
        .execute_batch(&transfer_batch(&setup, setup.alice, setup.bob));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::InvalidPreTransferInstruction
    ));

    // Full protocol: capture, payment, transfer, reconcile.
    let sale_price = 10_000u64;
    let rent_floor = ledger.rent_exempt_minimum(0);
    ledger
        .create_account(setup.alice, rent_floor, 0)
        .expect("Failed to fund alice");
    ledger
        .create_account(setup.bob, rent_floor + sale_price, 0)
        .expect("Failed to fund bob");

    let alice_token = ledger.token_account_address(&setup.alice, &setup.mint);
    let bob_token = ledger.token_account_address(&setup.bob, &setup.mint);
    let participants = vec![setup.alice, setup.bob, alice_token, bob_token];

    setup
        .engine
        .execute_batch(&Batch::new(vec![
            Operation::PreTransfer {
                participants: participants.clone(),
            },
            Operation::SystemTransfer {
                from: setup.bob,
                to: setup.alice,
                lamports: sale_price,
            },
            Operation::Transfer {
                mint: setup.mint,
                from: setup.alice,
                to: setup.bob,
            },
            Operation::PostTransfer,
        ]))
        .expect("Guarded sale should pass");

    assert_eq!(holder_of(&setup, &setup.bob), 1);
    // 500 bp of the 10_000 sale price.
    assert_eq!(ledger.native_balance(&setup.collector), Some(500));
    assert_eq!(
        ledger.native_balance(&setup.alice),
        Some(rent_floor + sale_price - 500)
    );
}

#[test]
fn test_capture_without_reconcile_rejects_whole_batch() {
    let setup = setup(true);
    let ledger = setup.engine.ledger();
    let rent_floor = ledger.rent_exempt_minimum(0);
    ledger.create_account(setup.alice, rent_floor, 0).unwrap();
    ledger
        .create_account(setup.bob, rent_floor + 10_000, 0)
        .unwrap();

    let alice_token = ledger.token_account_address(&setup.alice, &setup.mint);
    let bob_token = ledger.token_account_address(&setup.bob, &setup.mint);

    let result = setup.engine.execute_batch(&Batch::new(vec![
        Operation::PreTransfer {
            participants: vec![setup.alice, setup.bob, alice_token, bob_token],
        },
        Operation::SystemTransfer {
            from: setup.bob,
            to: setup.alice,
            lamports: 10_000,
        },
        Operation::Transfer {
            mint: setup.mint,
            from: setup.alice,
            to: setup.bob,
        },
        // No PostTransfer: the capture is left dangling.
    ]));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::InvalidPostTransferInstruction
    ));

    // Nothing persisted: the token did not move and the payment was
    // rolled back.
    assert_eq!(holder_of(&setup, &setup.alice), 1);
    assert_eq!(holder_of(&setup, &setup.bob), 0);
    assert_eq!(
        ledger.native_balance(&setup.bob),
        Some(rent_floor + 10_000)
    );
}

#[test]
fn test_reconcile_out_of_order() {
    let setup = setup(true);

    let result = setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::PostTransfer]));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::InvalidPostTransferInstruction
    ));

    // Capture followed directly by reconcile, with no transfer in
    // between, is also out of order.
    let ledger = setup.engine.ledger();
    let rent_floor = ledger.rent_exempt_minimum(0);
    ledger.create_account(setup.alice, rent_floor, 0).unwrap();
    let result = setup.engine.execute_batch(&Batch::new(vec![
        Operation::PreTransfer {
            participants: vec![setup.alice],
        },
        Operation::PostTransfer,
    ]));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::InvalidPostTransferInstruction
    ));
}

#[test]
fn test_lock_blocks_transfer_until_unlocked_in_batch() {
    let setup = setup(false);
    let delegate = Address::new_unique();

    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Approve {
            mint: setup.mint,
            holder: setup.alice,
            delegate,
        }]))
        .expect("Approve should pass");

    // Only the recorded delegate may lock.
    let outsider = Address::new_unique();
    let result = setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Lock {
            mint: setup.mint,
            signer: outsider,
        }]));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::InvalidLockedBy
    ));

    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Lock {
            mint: setup.mint,
            signer: delegate,
        }]))
        .expect("Lock by the delegate should pass");

    // Locked: the transfer alone fails.
    let result = setup
        .engine
        .execute_batch(&transfer_batch(&setup, setup.alice, setup.bob));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::MintStateLocked
    ));
    assert_eq!(holder_of(&setup, &setup.alice), 1);

    // Unlock and transfer within the same atomic batch succeeds.
    setup
        .engine
        .execute_batch(&Batch::new(vec![
            Operation::Unlock {
                mint: setup.mint,
                signer: delegate,
            },
            Operation::Transfer {
                mint: setup.mint,
                from: setup.alice,
                to: setup.bob,
            },
        ]))
        .expect("Unlock plus transfer in one batch should pass");
    assert_eq!(holder_of(&setup, &setup.bob), 1);
}

#[test]
fn test_unlock_by_mint_authority_override() {
    let setup = setup(false);
    let delegate = Address::new_unique();

    setup
        .engine
        .execute_batch(&Batch::new(vec![
            Operation::Approve {
                mint: setup.mint,
                holder: setup.alice,
                delegate,
            },
            Operation::Lock {
                mint: setup.mint,
                signer: delegate,
            },
        ]))
        .expect("Approve and lock should pass");

    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Unlock {
            mint: setup.mint,
            signer: setup.authority,
        }]))
        .expect("The mint manager authority can force an unlock");
}

#[test]
fn test_revoke_while_locked_is_hard_blocked() {
    let setup = setup(false);
    let delegate = Address::new_unique();

    setup
        .engine
        .execute_batch(&Batch::new(vec![
            Operation::Approve {
                mint: setup.mint,
                holder: setup.alice,
                delegate,
            },
            Operation::Lock {
                mint: setup.mint,
                signer: delegate,
            },
        ]))
        .expect("Approve and lock should pass");

    let result = setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Revoke {
            mint: setup.mint,
            holder: setup.alice,
        }]));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::MintStateLocked
    ));

    setup
        .engine
        .execute_batch(&Batch::new(vec![
            Operation::Unlock {
                mint: setup.mint,
                signer: delegate,
            },
            Operation::Revoke {
                mint: setup.mint,
                holder: setup.alice,
            },
        ]))
        .expect("Unlock then revoke should pass");
    assert_eq!(
        setup.engine.mint_states().get(&setup.mint).unwrap().delegate,
        None
    );
}

#[test]
fn test_burn_finality() {
    let setup = setup(false);

    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Burn {
            mint: setup.mint,
            holder: setup.alice,
        }]))
        .expect("Burn should pass");

    // The mint state is no longer readable as an active record.
    assert!(setup.engine.mint_states().get(&setup.mint).is_err());

    // Subsequent mint_to and transfer against the mint fail.
    let result = setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::MintTo {
            mint: setup.mint,
            signer: setup.authority,
            target: setup.bob,
        }]));
    assert!(result.is_err(), "mint_to after burn must fail");

    let result = setup
        .engine
        .execute_batch(&transfer_batch(&setup, setup.alice, setup.bob));
    assert!(result.is_err(), "transfer after burn must fail");
}

#[test]
fn test_close_token_account() {
    let setup = setup(false);

    // Bob's account is empty and closes fine.
    setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Close {
            mint: setup.mint,
            owner: setup.bob,
        }]))
        .expect("Closing an empty account should pass");

    // Alice still holds the token; her account refuses to close.
    let result = setup
        .engine
        .execute_batch(&Batch::new(vec![Operation::Close {
            mint: setup.mint,
            owner: setup.alice,
        }]));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::InvalidCloseTokenAccount
    ));
}

#[test]
fn test_failed_batch_leaves_no_admin_effects() {
    let setup = setup(false);
    let outsider = Address::new_unique();

    let result = setup.engine.execute_batch(&Batch::new(vec![
        Operation::InitRuleset {
            name: "second".to_string(),
            authority: setup.authority,
            collector: setup.collector,
            check_seller_fee_basis_points: false,
            disallowed_addresses: vec![],
            allowed_programs: vec![],
        },
        Operation::UpdateRuleset {
            ruleset: setup.ruleset_id,
            signer: outsider,
            authority: outsider,
            collector: setup.collector,
            check_seller_fee_basis_points: false,
            disallowed_addresses: vec![],
            allowed_programs: vec![],
        },
    ]));
    assert!(matches!(
        result.unwrap_err(),
        TokenGateError::InvalidAuthority
    ));

    // The ruleset created earlier in the failed batch is gone too.
    assert!(setup
        .engine
        .policy_store()
        .get_ruleset(&Ruleset::derive_id("second"))
        .is_err());
}
