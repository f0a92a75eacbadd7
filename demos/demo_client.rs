//! Interactive client used to exercise a running router by hand: it
//! registers a couple of procedures, can publish and subscribe to
//! topics, and can place calls, all from one command loop.
//!
//! Run a router first (`wampire -r demo_realm`), then this binary
//! against the same address and realm.
#![allow(clippy::too_many_arguments)]

use std::io;
use std::sync::{Arc, Mutex};

use argparse::{ArgumentParser, Store};
use log::info;
use tokio::net::TcpStream;

use wampire::client::{CallArgs, Client, Registration, Subscription};
use wampire::session::CallChit;
use wampire::transport::{HandshakeConfig, Serializer};
use wampire::{
    ArgList, CallOptions, CallResult, ClientRoles, Dict, HelloDetails, List, MatchingPolicy,
    PublishOptions, Reason, Value, URI,
};

fn addition(args: List, _kwargs: Dict) -> CallResult<(Option<List>, Option<Dict>)> {
    let a = args.get_int(0).unwrap_or(0);
    let b = args.get_int(1).unwrap_or(0);
    Ok((Some(vec![Value::Int(a + b)]), None))
}

fn echo(args: List, kwargs: Dict) -> CallResult<(Option<List>, Option<Dict>)> {
    Ok((Some(args), Some(kwargs)))
}

enum Command {
    Add,
    Echo,
    Sub,
    Pub,
    Unsub,
    List,
    Help,
    Quit,
    NoOp,
    Invalid(String),
}

fn prompt() -> (Command, Vec<String>) {
    println!("Enter a command (or type \"help\")");
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    let mut parts = input.splitn(2, ' ');
    let command = match parts.next() {
        Some(word) => word.trim().to_lowercase(),
        None => return (Command::NoOp, Vec::new()),
    };
    let command = match command.as_str() {
        "add" => Command::Add,
        "echo" => Command::Echo,
        "sub" => Command::Sub,
        "pub" => Command::Pub,
        "unsub" => Command::Unsub,
        "list" => Command::List,
        "help" => Command::Help,
        "quit" => Command::Quit,
        "" => Command::NoOp,
        other => Command::Invalid(other.to_string()),
    };
    let args = match parts.next() {
        Some(rest) => rest.split(',').map(|a| a.trim().to_string()).collect(),
        None => Vec::new(),
    };
    (command, args)
}

fn help() {
    println!("Commands:");
    println!("  add <a>, <b>          calls ca.demo.add");
    println!("  echo <args>*          calls ca.demo.echo");
    println!("  sub <topic>, <policy>?   subscribes (policy: strict|prefix|wild)");
    println!("  pub <topic>, <args>*  publishes with acknowledgement");
    println!("  unsub <index>         unsubscribes by index from `list`");
    println!("  list                  lists current subscriptions");
    println!("  quit                  leaves the realm and exits");
}

async fn call_add(client: &Client, args: &[String]) {
    if args.len() != 2 {
        println!("add needs exactly two numbers");
        return;
    }
    let (a, b) = match (args[0].parse::<i64>(), args[1].parse::<i64>()) {
        (Ok(a), Ok(b)) => (a, b),
        _ => {
            println!("both arguments must be integers");
            return;
        }
    };
    let call_args = vec![Value::Int(a), Value::Int(b)];
    report_call(client.call(URI::new("ca.demo.add"), CallOptions::new(), Some(call_args), None).await).await;
}

async fn call_echo(client: &Client, args: Vec<String>) {
    let call_args = args.into_iter().map(Value::String).collect();
    report_call(client.call(URI::new("ca.demo.echo"), CallOptions::new(), Some(call_args), None).await).await;
}

async fn report_call(outcome: Result<(CallChit, impl std::future::Future<Output = Result<CallArgs, wampire::Error>>), wampire::Error>) {
    match outcome {
        Ok((_chit, future)) => match future.await {
            Ok((args, kwargs)) => println!("Result: {:?} {:?}", args, kwargs),
            Err(e) => println!("Call failed: {:?}", e),
        },
        Err(e) => println!("Could not place call: {:?}", e),
    }
}

async fn subscribe(
    client: &Client,
    subscriptions: &Arc<Mutex<Vec<Subscription>>>,
    args: &[String],
) {
    if args.is_empty() {
        println!("please specify a topic");
        return;
    }
    let topic = args[0].clone();
    let policy = match args.get(1).map(String::as_str) {
        Some("prefix") => MatchingPolicy::Prefix,
        Some("wild") => MatchingPolicy::Wildcard,
        Some("strict") | None => MatchingPolicy::Strict,
        Some(other) => {
            println!("unknown matching policy {}", other);
            return;
        }
    };
    let handler_topic = topic.clone();
    let handler = Box::new(move |args: Option<List>, kwargs: Option<Dict>, _details| {
        println!("event on {}: {:?} {:?}", handler_topic, args, kwargs);
    });
    match client
        .subscribe_with_pattern(URI::new(&topic), policy, handler)
        .await
    {
        Ok(subscription) => {
            println!("subscribed to {}", topic);
            subscriptions.lock().unwrap().push(subscription);
        }
        Err(e) => println!("subscribe failed: {:?}", e),
    }
}

async fn unsubscribe(client: &Client, subscriptions: &Arc<Mutex<Vec<Subscription>>>, args: &[String]) {
    let index = match args.first().and_then(|a| a.parse::<usize>().ok()) {
        Some(i) => i,
        None => {
            println!("please give the numeric index shown by `list`");
            return;
        }
    };
    let subscription = {
        let mut subscriptions = subscriptions.lock().unwrap();
        if index >= subscriptions.len() {
            println!("no such subscription index");
            return;
        }
        subscriptions.remove(index)
    };
    let topic = subscription.topic.uri.clone();
    match client.unsubscribe(subscription).await {
        Ok(()) => println!("unsubscribed from {}", topic),
        Err(e) => println!("unsubscribe failed: {:?}", e),
    }
}

fn list(subscriptions: &Arc<Mutex<Vec<Subscription>>>) {
    for (index, subscription) in subscriptions.lock().unwrap().iter().enumerate() {
        println!("{} {}", index, subscription.topic.uri);
    }
}

async fn publish(client: &Client, args: &[String]) {
    if args.is_empty() {
        println!("please specify a topic");
        return;
    }
    let topic = args[0].clone();
    let values = args[1..]
        .iter()
        .map(|a| match a.parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::String(a.clone()),
        })
        .collect();
    match client
        .publish(URI::new(&topic), PublishOptions::new(true), Some(values), None)
        .await
    {
        Ok(publication) => println!("published to {} ({:?})", topic, publication),
        Err(e) => println!("publish failed: {:?}", e),
    }
}

async fn event_loop(client: Client, registrations: Vec<Registration>) {
    let subscriptions = Arc::new(Mutex::new(Vec::new()));
    loop {
        let (command, args) = prompt();
        match command {
            Command::Add => call_add(&client, &args).await,
            Command::Echo => call_echo(&client, args).await,
            Command::Sub => subscribe(&client, &subscriptions, &args).await,
            Command::Pub => publish(&client, &args).await,
            Command::Unsub => unsubscribe(&client, &subscriptions, &args).await,
            Command::List => list(&subscriptions),
            Command::Help => help(),
            Command::Quit => break,
            Command::NoOp => {}
            Command::Invalid(word) => println!("unknown command: {}", word),
        }
    }
    for registration in registrations {
        let _ = client.unregister(registration).await;
    }
    match client.leave(Reason::GoodbyeAndOut).await {
        Ok(_) => info!("left the realm cleanly"),
        Err(e) => info!("leave did not complete cleanly: {:?}", e),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut addr = "127.0.0.1:8090".to_string();
    let mut realm = "turnpike.examples".to_string();
    {
        let mut parser = ArgumentParser::new();
        parser.set_description("Interactive WAMP demo client");
        parser
            .refer(&mut addr)
            .add_option(&["-c", "--connect"], Store, "router address to connect to");
        parser
            .refer(&mut realm)
            .add_option(&["-r", "--realm"], Store, "realm to join");
        parser.parse_args_or_exit();
    }

    let stream = TcpStream::connect(&addr)
        .await
        .expect("failed to connect to router");
    info!("connected to {}", addr);

    let handshake = HandshakeConfig::new(4, Serializer::Json);
    let client = Client::connect(stream, handshake, None, None)
        .await
        .expect("rawsocket handshake failed");

    client
        .join(URI::new(&realm), HelloDetails::new(ClientRoles::new()))
        .await
        .expect("join failed");
    info!("joined realm {}", realm);

    let add_registration = client
        .enroll(
            URI::new("ca.demo.add"),
            MatchingPolicy::Strict,
            Box::new(|args, kwargs, _details| {
                Box::pin(async move { addition(args.unwrap_or_default(), kwargs.unwrap_or_default()) })
            }),
        )
        .await
        .expect("failed to register ca.demo.add");

    let echo_registration = client
        .enroll(
            URI::new("ca.demo.echo"),
            MatchingPolicy::Strict,
            Box::new(|args, kwargs, _details| {
                Box::pin(async move { echo(args.unwrap_or_default(), kwargs.unwrap_or_default()) })
            }),
        )
        .await
        .expect("failed to register ca.demo.echo");

    help();
    event_loop(client, vec![add_registration, echo_registration]).await;
}
