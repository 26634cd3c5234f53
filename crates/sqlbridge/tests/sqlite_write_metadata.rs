use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use std::sync::Arc;

use sqlbridge::prelude::*;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

async fn setup(cx: &Cx) -> Executor<SqliteDriver> {
    let db = SqliteDatabase::open_memory().expect("open sqlite memory db");
    let driver = SqliteDialect::new(SqliteDialectConfig::new(Arc::new(db))).create_driver();
    unwrap_outcome(driver.init(cx).await);
    let executor = Executor::new(Arc::new(driver));
    unwrap_outcome(
        executor
            .execute(
                cx,
                &CompiledQuery::write(
                    "create table item (\
                        id integer primary key autoincrement, \
                        code text not null unique, \
                        is_active boolean not null)",
                    Vec::new(),
                ),
            )
            .await,
    );
    executor
}

fn insert_item(code: &str, is_active: bool) -> CompiledQuery {
    CompiledQuery::write(
        "insert into item (code, is_active) values (?, ?)",
        vec![Value::from(code), Value::Bool(is_active)],
    )
}

#[test]
fn sqlite_mass_update_reports_only_matched_rows() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let executor = setup(&cx).await;
        for i in 0..100 {
            let result = unwrap_outcome(
                executor
                    .execute(&cx, &insert_item(&format!("item-{i}"), i < 90))
                    .await,
            );
            assert_eq!(result.num_affected_rows, Some(1));
        }

        let result = unwrap_outcome(
            executor
                .execute(
                    &cx,
                    &CompiledQuery::write(
                        "update item set is_active = ? where is_active = ?",
                        vec![Value::Bool(false), Value::Bool(true)],
                    ),
                )
                .await,
        );
        assert_eq!(result.num_affected_rows, Some(90));
        assert!(result.rows.is_empty());
    });
}

#[test]
fn sqlite_insert_ids_are_sequential() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let executor = setup(&cx).await;
        let ids: Vec<i64> = {
            let mut ids = Vec::new();
            for code in ["a", "b", "c"] {
                let result = unwrap_outcome(executor.execute(&cx, &insert_item(code, true)).await);
                ids.push(result.insert_id.expect("write reports insert id"));
            }
            ids
        };
        assert_eq!(ids, vec![1, 2, 3]);
    });
}

#[test]
fn sqlite_ignored_and_upserted_conflicts() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let executor = setup(&cx).await;
        unwrap_outcome(executor.execute(&cx, &insert_item("dup", true)).await);

        let ignored = unwrap_outcome(
            executor
                .execute(
                    &cx,
                    &CompiledQuery::write(
                        "insert into item (code, is_active) values (?, ?) on conflict (code) do nothing",
                        vec![Value::from("dup"), Value::Bool(false)],
                    ),
                )
                .await,
        );
        assert_eq!(ignored.num_affected_rows, Some(0));

        let or_ignore = unwrap_outcome(
            executor
                .execute(
                    &cx,
                    &CompiledQuery::write(
                        "insert or ignore into item (code, is_active) values (?, ?)",
                        vec![Value::from("dup"), Value::Bool(false)],
                    ),
                )
                .await,
        );
        assert_eq!(or_ignore.num_affected_rows, Some(0));

        let upserted = unwrap_outcome(
            executor
                .execute(
                    &cx,
                    &CompiledQuery::write(
                        "insert into item (code, is_active) values (?, ?) \
                         on conflict (code) do update set is_active = excluded.is_active",
                        vec![Value::from("dup"), Value::Bool(false)],
                    ),
                )
                .await,
        );
        assert_eq!(upserted.num_affected_rows, Some(1));

        let row = unwrap_outcome(
            executor
                .execute_take_first(
                    &cx,
                    &CompiledQuery::read(
                        "select count(*) as n, max(is_active) as active from item",
                        Vec::new(),
                    ),
                )
                .await,
        )
        .expect("aggregate returns a row");
        assert_eq!(row.get_named::<i64>("n").unwrap(), 1);
        assert!(!row.get_named::<bool>("active").unwrap());
    });
}

#[test]
fn sqlite_constraint_violation_propagates_engine_error() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let executor = setup(&cx).await;
        unwrap_outcome(executor.execute(&cx, &insert_item("x", true)).await);

        match executor.execute(&cx, &insert_item("x", true)).await {
            Outcome::Err(Error::Query(q)) => {
                assert!(q.is_constraint_violation());
                assert!(q.message.contains("UNIQUE"), "engine message kept: {}", q.message);
            }
            other => panic!("expected constraint error, got {other:?}"),
        }
        assert!(!executor.driver().is_connection_held());
    });
}
