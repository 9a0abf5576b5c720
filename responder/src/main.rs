use responder::{Config, Server};

fn main() -> responder::Result<()> {
    log::init();

    let config = Config::load()?;
    let server = Server::bind(&config)?;

    let port = server.local_addr()?.port();
    println!("Server is listening on http://{}:{}", config.host, port);

    server.run()
}
