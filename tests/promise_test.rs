#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use promise_lane::{Context, DispatcherExt, Error, Flags, Promise, SerialLane};
    use std::{thread, time::Duration};

    #[test]
    fn test_promise() {
        let (promise, resolver) = Promise::<i32>::pending();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            resolver.fulfill(42);
        });

        let result = promise.wait().unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_value_map_done() {
        let (tx, rx) = std::sync::mpsc::channel();
        Promise::value(42)
            .map(|x| Ok(x + 10))
            .done(move |x| {
                tx.send(x).unwrap();
                Ok(())
            })
            .cauterize();
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 52);
    }

    #[test]
    fn test_await_chain_across_lanes() {
        let a = SerialLane::new("a").unwrap();
        let b = SerialLane::new("b").unwrap();
        let chained = Promise::value(String::from("🍓"))
            .map_on(a, Flags::NONE, |s| Ok(s.repeat(2)))
            .then_on(b.clone(), Flags::NONE, move |s| {
                Ok(b.promise(Flags::NONE, move || Ok(s.chars().count())))
            });
        assert_eq!(block_on(chained).unwrap(), 2);
    }

    #[test]
    fn test_rejection_skips_to_recover() {
        let recovered = Promise::<i32>::rejected(Error::BadInput)
            .map_on(Context::Inline, Flags::NONE, |x| Ok(x + 1))
            .recover_on(Context::Inline, Flags::NONE, |err| match err {
                Error::BadInput => Ok(Promise::value(-1)),
                other => Err(other),
            });
        assert_eq!(recovered.fulfilled(), Some(-1));
    }

    #[test]
    fn test_settle_once_from_many_threads() {
        let (promise, resolver) = Promise::<usize>::pending();
        let tasks: Vec<_> = (0..4)
            .map(|n| {
                let resolver = resolver.clone();
                thread::spawn(move || {
                    if n % 2 == 0 {
                        resolver.fulfill(n)
                    } else {
                        resolver.reject(Error::Cancelled)
                    }
                })
            })
            .collect();
        for task in tasks {
            task.join().expect("a resolver thread has panicked");
        }
        let first = promise.result().expect("settled");
        for _ in 0..3 {
            assert_eq!(format!("{:?}", promise.result().unwrap()), format!("{first:?}"));
        }
    }

    #[test]
    fn test_lane_continuations_run_in_registration_order() {
        let lane = SerialLane::new("fifo").unwrap();
        let (start, resolver) = Promise::<()>::pending();
        let (tx, rx) = std::sync::mpsc::channel();
        for n in 0..32 {
            let tx = tx.clone();
            start.map_on(lane.clone(), Flags::NONE, move |()| {
                tx.send(n).unwrap();
                Ok(())
            });
        }
        resolver.fulfill(());
        let seen: Vec<usize> = (0..32)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_registration_racing_settlement_runs_each_once() {
        const COUNT: usize = 200;
        let lane = SerialLane::new("race").unwrap();
        let (start, resolver) = Promise::<usize>::pending();
        let (tx, rx) = std::sync::mpsc::channel();
        let registrar = thread::spawn(move || {
            for n in 0..COUNT {
                let tx = tx.clone();
                let body = move |x: usize| {
                    tx.send(n + x).unwrap();
                    Ok(())
                };
                if n % 2 == 0 {
                    start.map_on(Context::Inline, Flags::NONE, body);
                } else {
                    start.map_on(lane.clone(), Flags::NONE, body);
                }
            }
        });
        let settler = thread::spawn(move || resolver.fulfill(0));
        settler.join().expect("the settling thread has panicked");
        registrar.join().expect("the registering thread has panicked");

        let mut seen: Vec<usize> = (0..COUNT)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        seen.sort_unstable();
        assert_eq!(seen, (0..COUNT).collect::<Vec<_>>());
    }
}
