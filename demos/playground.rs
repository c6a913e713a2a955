use futures::executor::block_on;
use promise_chain::scheduler::schedule_after;
use promise_chain::{Error, Promise, Scheduler};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};

type P = Promise<String, Error>;

fn deferred(seconds: u64, outcome: Result<String, Error>) -> P {
    Promise::new(move |resolver| {
        schedule_after(Duration::from_secs(seconds), move || {
            match outcome {
                Ok(value) => resolver.resolve(value),
                Err(error) => resolver.reject(error),
            };
        });
        Ok(())
    })
}

fn main() -> Result<(), Error> {
    let mut filter = EnvFilter::from_default_env();
    filter = filter.add_directive(LevelFilter::INFO.into());
    let print = fmt::layer().compact();
    registry().with(filter).with(print).init();

    P::resolve("Hello, promise".into()).then(|value| info!(%value, "resolved"));
    P::reject(Error::Timeout).catch(|reason| info!(%reason, "rejected"));

    // fulfillment

    let immediate = P::new(|resolver| {
        resolver.resolve("immediately fulfilled in executor".into());
        Ok(())
    })
    .map(|value| value.to_uppercase());

    let chained = deferred(1, Ok("deferred fulfillment in executor".into()))
        .then(|value| {
            info!(%value, "first link");
            deferred(1, Ok("deferred fulfillment in then".into()))
        })
        .then(|value| info!(%value, "second link"))
        .catch(|reason| info!(%reason, "chain rejected"));

    let counted = Promise::<i32, Error>::resolve(3)
        .then(|value| {
            Promise::<i32, Error>::new(move |resolver| {
                let x = value + 1;
                schedule_after(Duration::from_secs(1), move || {
                    resolver.resolve(x + 1);
                });
                Ok(())
            })
        })
        .map(|value| value + 1)
        .map(|value| value + 1);

    // rejection

    let rejected = deferred(1, Err(Error::Timeout)).catch(|reason| {
        info!(%reason, "recovering");
        P::resolve("recovered".into())
    });

    // combinators and timeouts

    let all = Promise::all([
        deferred(1, Ok("one".into())),
        P::resolve("two".into()),
        deferred(2, Ok("three".into())),
    ]);
    let race = Promise::race([deferred(2, Ok("slow".into())), deferred(1, Ok("fast".into()))]);

    let scheduler = Scheduler::new()?;
    let timed_out = deferred(3, Ok("too late".into())).timeout(&scheduler.handle(), Duration::from_secs(1));

    info!(value = ?immediate.value(), "immediate");
    info!(result = ?block_on(chained), "chained");
    info!(result = ?block_on(counted), "counted");
    info!(result = ?block_on(rejected), "rejected");
    info!(result = ?block_on(all), "all");
    info!(result = ?block_on(race), "race");
    info!(result = ?block_on(timed_out), "timeout");

    Ok(())
}
