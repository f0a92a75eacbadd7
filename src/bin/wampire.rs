use std::time::Duration;

use argparse::{ArgumentParser, Store};
use log::info;
use wampire::Router;

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut addr = "127.0.0.1:8090".to_string();
    let mut realm = "turnpike.examples".to_string();
    {
        let mut parser = ArgumentParser::new();
        parser.set_description("Stand-alone WAMP router");
        parser
            .refer(&mut addr)
            .add_option(&["-l", "--listen"], Store, "address to listen on");
        parser
            .refer(&mut realm)
            .add_option(&["-r", "--realm"], Store, "realm to pre-create");
        parser.parse_args_or_exit();
    }

    let router = Router::new();
    router.add_realm(&realm);

    let listener = router
        .listen(&addr, Some(Duration::from_secs(20)))
        .await
        .expect("failed to bind listener");
    info!("router listening on {} (realm {})", addr, realm);
    listener.await.ok();
}
