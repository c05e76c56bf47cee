use alcor::mailbox::MailSender;
use alcor::mailbox::Mailbox;
use loom::thread;

#[test]
fn concurrent_offers_are_not_lost() {
  loom::model(|| {
    let (sender, mut mailbox): (MailSender<i32>, Mailbox<i32>) = Mailbox::new();
    let second: MailSender<i32> = sender.clone();

    let a: thread::JoinHandle<()> = thread::spawn(move || sender.offer(1));
    let b: thread::JoinHandle<()> = thread::spawn(move || second.offer(2));

    a.join().unwrap();
    b.join().unwrap();

    let mut seen: Vec<i32> = Vec::new();

    while let Some(item) = mailbox.poll() {
      seen.push(item);
    }

    seen.sort_unstable();

    assert_eq!(seen, [1, 2]);
  });
}

#[test]
fn poll_racing_offer_sees_it_or_nothing() {
  loom::model(|| {
    let (sender, mut mailbox): (MailSender<i32>, Mailbox<i32>) = Mailbox::new();

    let producer: thread::JoinHandle<()> = thread::spawn(move || sender.offer(9));

    let early: Option<i32> = mailbox.poll();

    producer.join().unwrap();

    match early {
      Some(item) => {
        assert_eq!(item, 9);
        assert_eq!(mailbox.poll(), None);
      }
      None => {
        assert_eq!(mailbox.poll(), Some(9));
      }
    }
  });
}

#[test]
fn tail_unlink_racing_offer_keeps_survivors() {
  loom::model(|| {
    let (sender, mut mailbox): (MailSender<i32>, Mailbox<i32>) = Mailbox::new();

    sender.offer(1);
    sender.offer(2);

    let second: MailSender<i32> = sender.clone();
    let producer: thread::JoinHandle<()> = thread::spawn(move || second.offer(3));

    // Unlinks the current tail while the producer may be mid-append.
    assert_eq!(mailbox.poll_match(|item| *item == 2), Some(2));

    producer.join().unwrap();

    assert_eq!(mailbox.poll(), Some(1));
    assert_eq!(mailbox.poll(), Some(3));
    assert_eq!(mailbox.poll(), None);
  });
}
