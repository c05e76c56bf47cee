//! End-to-end scenarios exercising procs, links, and the receive engine.

#![cfg(not(loom))]

use std::sync::mpsc;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use alcor::error::Fault;
use alcor::node::Node;
use alcor::proc::any;
use alcor::proc::exit;
use alcor::proc::on;
use alcor::proc::Proc;
use alcor::proc::ProcId;

fn init() {
  let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn receive_timeout_runs_fallthrough_once() {
  init();

  let node: Node = Node::new("timeout");

  let handled: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
  let timed_out: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

  let start: Instant = Instant::now();

  {
    let handled: Arc<AtomicUsize> = Arc::clone(&handled);
    let timed_out: Arc<AtomicUsize> = Arc::clone(&timed_out);

    node.spawn(move |proc: &mut Proc| {
      proc.receive_timeout_or(
        any(|_message| {
          handled.fetch_add(1, Ordering::Relaxed);
          Ok(())
        }),
        Duration::from_millis(100),
        || {
          timed_out.fetch_add(1, Ordering::Relaxed);
        },
      )
    });
  }

  node.join_all();

  assert!(start.elapsed() < Duration::from_millis(2000));
  assert_eq!(handled.load(Ordering::Relaxed), 0);
  assert_eq!(timed_out.load(Ordering::Relaxed), 1);
  assert!(node.uncaught_faults().is_empty());
}

#[test]
fn link_propagates_abnormal_exit() {
  init();

  let node: Node = Node::new("chain");

  // The canary: if the chain fails to die, this fault appears in the sink.
  let mut last: ProcId = node.spawn(|proc: &mut Proc| {
    proc.sleep(Duration::from_secs(2))?;

    Err(Fault::new("the canary lived too long").into())
  });

  for _ in 0..100 {
    let prev: ProcId = last.clone();

    last = node.spawn(move |proc: &mut Proc| {
      proc.link(&prev);
      proc.sleep(Duration::from_secs(2))?;

      Err(Fault::new("link chain did not terminate").into())
    });
  }

  let tail: ProcId = last.clone();

  node.spawn(move |proc: &mut Proc| {
    proc.link(&tail);
    proc.sleep(Duration::from_secs(1))?;

    Err(Fault::new("break the chain").into())
  });

  let start: Instant = Instant::now();

  node.join_all();

  assert!(start.elapsed() < Duration::from_secs(2), "chain survived the breaker");

  let faults: Vec<Arc<Fault>> = node.uncaught_faults();

  assert_eq!(faults.len(), 1);
  assert_eq!(faults[0].error(), "break the chain");
}

#[test]
fn link_does_not_propagate_normal_exit() {
  init();

  let node: Node = Node::new("gentle");

  // Exits normally as soon as it receives a message. A normal exit must
  // not take the linked proc down with it.
  let first: ProcId = node.spawn(|proc: &mut Proc| {
    proc.receive(any(|_message| exit()))
  });

  let watcher: ProcId = node.spawn(|proc: &mut Proc| {
    proc.receive_timeout_or(
      any(|_message| exit()),
      Duration::from_secs(1),
      || panic!("the link killed the other proc"),
    )
  });

  {
    let first: ProcId = first.clone();
    let watcher: ProcId = watcher.clone();

    node.spawn(move |proc: &mut Proc| {
      proc.link(&first);

      first.send(1_u32);
      proc.sleep(Duration::from_millis(250))?;
      watcher.send(1_u32);

      Ok(())
    });
  }

  node.join_all();

  assert!(node.uncaught_faults().is_empty());
}

#[test]
fn unlink_stops_propagation() {
  init();

  let node: Node = Node::new("unlink");

  let doomed: ProcId = node.spawn(|proc: &mut Proc| {
    proc.sleep(Duration::from_millis(300))?;

    Err(Fault::new("crash").into())
  });

  let (done, outcome): (mpsc::Sender<bool>, mpsc::Receiver<bool>) = mpsc::channel();

  {
    let doomed: ProcId = doomed.clone();

    node.spawn(move |proc: &mut Proc| {
      proc.link(&doomed);
      proc.unlink(&doomed);

      proc.sleep(Duration::from_millis(800))?;

      done.send(true).ok();

      Ok(())
    });
  }

  node.join_all();

  assert_eq!(outcome.try_recv(), Ok(true));
  assert_eq!(node.uncaught_faults().len(), 1);
  assert_eq!(node.uncaught_faults()[0].error(), "crash");
}

#[test]
fn selective_receive_skips_earlier_mail() {
  init();

  let node: Node = Node::new("selective");

  let (done, outcome): (
    mpsc::Sender<(u32, Vec<&'static str>)>,
    mpsc::Receiver<(u32, Vec<&'static str>)>,
  ) = mpsc::channel();

  let pid: ProcId = node.spawn(move |proc: &mut Proc| {
    // The number arrives last but is received first; the earlier strings
    // stay queued in order.
    let mut number: u32 = 0;

    proc.receive(on(|value: u32| {
      number = value;
      Ok(())
    }))?;

    let mut text: Vec<&'static str> = Vec::new();

    for _ in 0..2 {
      proc.receive(on(|value: &'static str| {
        text.push(value);
        Ok(())
      }))?;
    }

    done.send((number, text)).ok();

    Ok(())
  });

  pid.send("first");
  pid.send("second");
  pid.send(7_u32);

  node.join_all();

  let (number, text): (u32, Vec<&'static str>) = outcome.recv_timeout(Duration::from_secs(5)).unwrap();

  assert_eq!(number, 7);
  assert_eq!(text, ["first", "second"]);
}

#[test]
fn request_reply_round_trips() {
  init();

  let node: Node = Node::new("echo");

  let (done, outcome): (mpsc::Sender<Vec<u32>>, mpsc::Receiver<Vec<u32>>) = mpsc::channel();

  let echo: ProcId = node.spawn_rec(
    |proc: &mut Proc, remaining: u32| {
      if remaining == 0 {
        return Ok(None);
      }

      let mut request: Option<(ProcId, u32)> = None;

      proc.receive(on(|pair: (ProcId, u32)| {
        request = Some(pair);
        Ok(())
      }))?;

      if let Some((from, value)) = request {
        from.send(value + 1);
      }

      Ok(Some(remaining - 1))
    },
    5_u32,
  );

  node.spawn(move |proc: &mut Proc| {
    let mut seen: Vec<u32> = Vec::new();

    for value in [10, 20, 30, 40, 50] {
      echo.send((proc.pid(), value));

      let mut reply: Option<u32> = None;

      proc.receive(on(|value: u32| {
        reply = Some(value);
        Ok(())
      }))?;

      if let Some(value) = reply {
        seen.push(value);
      }
    }

    done.send(seen).ok();

    Ok(())
  });

  node.join_all();

  let seen: Vec<u32> = outcome.recv_timeout(Duration::from_secs(5)).unwrap();

  assert_eq!(seen, [11, 21, 31, 41, 51]);
  assert!(node.uncaught_faults().is_empty());
}

#[test]
fn sleep_is_cut_short_by_link_exit() {
  init();

  let node: Node = Node::new("sleeper");

  let sleeper: ProcId = node.spawn(|proc: &mut Proc| {
    proc.sleep(Duration::from_secs(30))?;

    Err(Fault::new("slept through the exit request").into())
  });

  {
    let sleeper: ProcId = sleeper.clone();

    node.spawn(move |proc: &mut Proc| {
      proc.link(&sleeper);
      proc.sleep(Duration::from_millis(100))?;

      Err(Fault::new("wake up").into())
    });
  }

  let start: Instant = Instant::now();

  node.join_all();

  assert!(start.elapsed() < Duration::from_secs(5));

  let faults: Vec<Arc<Fault>> = node.uncaught_faults();

  assert_eq!(faults.len(), 1);
  assert_eq!(faults[0].error(), "wake up");
}
